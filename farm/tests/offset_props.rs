//! Property checks for the layout arithmetic: the slab offsets of a
//! pool's tasks must tile the persisted dataset without overlap, and the
//! schema fixup must be idempotent.

use harrow_farm::{
    checkpoint::window_size,
    layout::{check_schema, dataset_dims, slab_offset, DataType, MappingPolicy, Schema},
};
use proptest::prelude::*;

fn policies() -> impl Strategy<Value = MappingPolicy> {
    prop_oneof![
        Just(MappingPolicy::Pm3d),
        Just(MappingPolicy::List),
        Just(MappingPolicy::Board),
    ]
}

fn dtypes() -> impl Strategy<Value = DataType> {
    prop_oneof![Just(DataType::F64), Just(DataType::I32)]
}

proptest! {
    #[test]
    fn check_schema_is_idempotent(
        dims in [1usize..8, 1usize..8],
        dtype in dtypes(),
        policy in policies(),
        persist in any::<bool>(),
    ) {
        let mut schema = Schema::new("bank", dims, dtype, policy);
        schema.persist = persist;
        schema.sync = false;

        check_schema(&mut schema).unwrap();
        let first = schema.clone();
        check_schema(&mut schema).unwrap();

        prop_assert_eq!(first, schema);
    }

    #[test]
    fn derived_sizes_match_dims(
        dims in [1usize..8, 1usize..8],
        dtype in dtypes(),
        policy in policies(),
    ) {
        let mut schema = Schema::new("bank", dims, dtype, policy);
        check_schema(&mut schema).unwrap();

        prop_assert_eq!(schema.elements, dims[0] * dims[1]);
        prop_assert_eq!(schema.byte_size, dims[0] * dims[1] * dtype.size());
    }

    /// Every task's slab must land inside the dataset, and no two tasks
    /// may touch the same element.
    #[test]
    fn slabs_tile_the_dataset(
        bank_dims in [1usize..4, 1usize..4],
        board_dims in [1usize..5, 1usize..5],
        policy in policies(),
    ) {
        let dataset = dataset_dims(policy, bank_dims, board_dims);
        let mut covered = vec![0u32; dataset[0] * dataset[1]];

        for y in 0..board_dims[1] {
            for x in 0..board_dims[0] {
                let tid = (y * board_dims[0] + x) as i32;
                let offset = slab_offset(policy, bank_dims, board_dims, tid, [x, y]);

                prop_assert!(offset[0] + bank_dims[0] <= dataset[0]);
                prop_assert!(offset[1] + bank_dims[1] <= dataset[1]);

                for row in 0..bank_dims[0] {
                    for col in 0..bank_dims[1] {
                        covered[(offset[0] + row) * dataset[1] + offset[1] + col] += 1;
                    }
                }
            }
        }

        let pool_size = board_dims[0] * board_dims[1];
        let touched: u32 = covered.iter().sum();
        prop_assert_eq!(touched as usize, pool_size * bank_dims[0] * bank_dims[1]);
        prop_assert!(covered.iter().all(|count| *count <= 1));
    }

    #[test]
    fn window_size_is_a_positive_worker_multiple(
        target in 0usize..200,
        workers in 1usize..12,
    ) {
        let size = window_size(target, workers);

        prop_assert!(size > 0);
        prop_assert_eq!(size % workers, 0);
        prop_assert!(size <= target.max(workers));
    }
}
