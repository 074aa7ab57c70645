use super::{
    check_layout, check_schema, dataset_dims, slab_offset, DataType, MappingPolicy, Schema,
    StorageError,
};

fn checked(mut schema: Schema) -> Schema {
    check_schema(&mut schema).unwrap();
    schema
}

#[test]
pub fn derives_elements_and_byte_size() {
    let schema = checked(Schema::new(
        "result",
        [3, 5],
        DataType::F64,
        MappingPolicy::Pm3d,
    ));

    assert_eq!(schema.elements, 15);
    assert_eq!(schema.byte_size, 120);
}

#[test]
pub fn check_is_idempotent() {
    let first = checked(Schema::persisted(
        "result",
        [2, 7],
        DataType::I32,
        MappingPolicy::List,
    ));
    let second = checked(first.clone());

    assert_eq!(first, second);
}

#[test]
pub fn persist_forces_sync() {
    let mut schema = Schema::persisted("result", [1, 3], DataType::F64, MappingPolicy::Board);
    schema.sync = false;
    check_schema(&mut schema).unwrap();

    assert!(schema.sync);
}

#[test]
pub fn rejects_bad_rank() {
    let mut schema = Schema::new("result", [1, 1], DataType::F64, MappingPolicy::Group);
    schema.rank = 1;

    assert!(matches!(
        check_schema(&mut schema),
        Err(StorageError::InvalidRank { rank: 1, .. })
    ));
}

#[test]
pub fn rejects_zero_dim() {
    let mut schema = Schema::new("result", [4, 0], DataType::F64, MappingPolicy::Group);

    assert!(matches!(
        check_schema(&mut schema),
        Err(StorageError::InvalidDim { axis: 1, .. })
    ));
}

#[test]
pub fn rejects_persist_without_path() {
    let mut schema = Schema::persisted("", [1, 1], DataType::F64, MappingPolicy::List);

    assert!(matches!(
        check_schema(&mut schema),
        Err(StorageError::MissingPath)
    ));
}

#[test]
pub fn checks_whole_layouts() {
    let mut schemas = vec![
        Schema::new("a", [1, 2], DataType::F64, MappingPolicy::Group),
        Schema::new("b", [2, 2], DataType::I32, MappingPolicy::Group),
    ];

    check_layout(schemas.iter_mut()).unwrap();
    assert_eq!(schemas[0].elements, 2);
    assert_eq!(schemas[1].elements, 4);
}

#[test]
pub fn dataset_dims_per_policy() {
    let bank = [2, 3];
    let board = [4, 5];

    assert_eq!(dataset_dims(MappingPolicy::Group, bank, board), [2, 3]);
    assert_eq!(dataset_dims(MappingPolicy::Basic, bank, board), [2, 3]);
    // pool size = 20 cells, rows scale by it
    assert_eq!(dataset_dims(MappingPolicy::Pm3d, bank, board), [40, 3]);
    assert_eq!(dataset_dims(MappingPolicy::List, bank, board), [40, 3]);
    // board keeps the 2-D shape
    assert_eq!(dataset_dims(MappingPolicy::Board, bank, board), [8, 15]);
}

#[test]
pub fn pm3d_offset_law() {
    let bank = [3, 2];
    let board = [4, 5];

    for y in 0..5 {
        for x in 0..4 {
            let offset = slab_offset(MappingPolicy::Pm3d, bank, board, 0, [x, y]);
            assert_eq!(offset, [(x + 4 * y) * 3, 0]);
        }
    }
}

#[test]
pub fn list_offset_law() {
    let bank = [2, 4];
    let board = [3, 3];

    for tid in 0..9 {
        let offset = slab_offset(MappingPolicy::List, bank, board, tid, [0, 0]);
        assert_eq!(offset, [tid as usize * 2, 0]);
    }
}

#[test]
pub fn board_offset_law() {
    let bank = [2, 3];
    let board = [4, 4];

    for y in 0..4 {
        for x in 0..4 {
            let offset = slab_offset(MappingPolicy::Board, bank, board, 0, [x, y]);
            assert_eq!(offset, [x * 2, y * 3]);
        }
    }
}

#[test]
pub fn group_and_basic_have_no_offset() {
    let bank = [2, 2];
    let board = [3, 3];

    assert_eq!(slab_offset(MappingPolicy::Group, bank, board, 7, [2, 1]), [0, 0]);
    assert_eq!(slab_offset(MappingPolicy::Basic, bank, board, 7, [2, 1]), [0, 0]);
}
