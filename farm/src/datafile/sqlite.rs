//! SQLite-backed dataset store: one row per dataset, blobs at their
//! final size, slab writes done read-modify-write inside the blob.

use super::{block_bytes, DatafileError};
use crate::{layout::DataType, MAX_RANK};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, error};

#[derive(Debug)]
pub struct SqliteStore {
    connection: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, DatafileError> {
        let connection = Connection::open(path)?;

        let mut counter = 1;
        for table in SQL_SCHEMA {
            match connection.execute(table, []) {
                Ok(_) => debug!("Applied SQL schema ({counter}/{SQL_SCHEMA_NUMBER})"),
                Err(error) => {
                    error!(error = ?error, table = table, "Failed to apply SQL schema ({counter}/{SQL_SCHEMA_NUMBER}): {error}");

                    return Err(DatafileError::Sqlite(error));
                }
            };

            counter += 1;
        }

        Ok(Self { connection })
    }

    pub fn ensure_group(&mut self, path: &str) -> Result<(), DatafileError> {
        self.connection
            .prepare_cached("insert or ignore into groups (path) values (?)")?
            .execute(params![path])?;

        Ok(())
    }

    pub fn ensure_dataset(
        &mut self,
        path: &str,
        dtype: DataType,
        dims: [usize; MAX_RANK],
    ) -> Result<(), DatafileError> {
        let blob = vec![0u8; block_bytes(dtype, dims)];

        let created = self
            .connection
            .prepare_cached(
                "insert or ignore into datasets
                 (path, dtype, rows, cols, data)
                 values (?, ?, ?, ?, ?)",
            )?
            .execute(params![path, dtype.tag(), dims[0], dims[1], blob])?;

        if created > 0 {
            debug!(path = path, rows = dims[0], cols = dims[1], "Created dataset");
        }

        Ok(())
    }

    pub fn write(&mut self, path: &str, bytes: &[u8]) -> Result<(), DatafileError> {
        let updated = self
            .connection
            .prepare_cached("update datasets set data = ? where path = ?")?
            .execute(params![bytes, path])?;

        if updated == 0 {
            return Err(DatafileError::MissingDataset(path.to_owned()));
        }

        Ok(())
    }

    pub fn write_slab(
        &mut self,
        path: &str,
        offset: [usize; MAX_RANK],
        dims: [usize; MAX_RANK],
        bytes: &[u8],
    ) -> Result<(), DatafileError> {
        let (dtype, shape, mut data) = self.fetch(path)?;

        splice_slab(path, dtype, shape, &mut data, offset, dims, bytes)?;

        self.write(path, &data)
    }

    pub fn read(&mut self, path: &str) -> Result<Vec<u8>, DatafileError> {
        Ok(self.fetch(path)?.2)
    }

    fn fetch(
        &mut self,
        path: &str,
    ) -> Result<(DataType, [usize; MAX_RANK], Vec<u8>), DatafileError> {
        let row = self
            .connection
            .prepare_cached("select dtype, rows, cols, data from datasets where path = ?")?
            .query_row(params![path], |row| {
                Ok((
                    row.get::<_, i32>(0)?,
                    row.get::<_, usize>(1)?,
                    row.get::<_, usize>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            })
            .optional()?
            .ok_or_else(|| DatafileError::MissingDataset(path.to_owned()))?;

        let dtype = DataType::from_tag(row.0)
            .ok_or_else(|| DatafileError::MissingDataset(path.to_owned()))?;

        Ok((dtype, [row.1, row.2], row.3))
    }

    pub fn set_attr(&mut self, group: &str, name: &str, value: i32) -> Result<(), DatafileError> {
        self.connection
            .prepare_cached(
                "insert or replace into attributes
                 (path, name, value) values (?, ?, ?)",
            )?
            .execute(params![group, name, value])?;

        Ok(())
    }

    pub fn attr(&mut self, group: &str, name: &str) -> Result<i32, DatafileError> {
        self.connection
            .prepare_cached("select value from attributes where path = ? and name = ?")?
            .query_row(params![group, name], |row| row.get(0))
            .optional()?
            .ok_or_else(|| DatafileError::MissingAttribute {
                path: group.to_owned(),
                name: name.to_owned(),
            })
    }

    pub fn close(mut self) -> Result<(), DatafileError> {
        let mut counter = 0;
        while let Err((connection, error)) = self.connection.close() {
            counter += 1;
            self.connection = connection;
            error!(error = ?error, "Failed to close the datafile: {error}, trying again {counter}/3");

            if counter == 3 {
                error!("Failed to close the datafile, giving up");

                return Err(DatafileError::Sqlite(error));
            }
        }

        debug!("Closed the datafile");

        Ok(())
    }
}

/// Copy a slab row by row into the row-major dataset blob. Shared by the
/// SQLite and in-memory backends so their bounds rules cannot diverge.
pub(super) fn splice_slab(
    path: &str,
    dtype: DataType,
    shape: [usize; MAX_RANK],
    data: &mut [u8],
    offset: [usize; MAX_RANK],
    dims: [usize; MAX_RANK],
    bytes: &[u8],
) -> Result<(), DatafileError> {
    let esize = dtype.size();

    if offset[0] + dims[0] > shape[0]
        || offset[1] + dims[1] > shape[1]
        || bytes.len() != block_bytes(dtype, dims)
    {
        return Err(DatafileError::SlabBounds(path.to_owned()));
    }

    for row in 0..dims[0] {
        let src = row * dims[1] * esize;
        let dst = ((offset[0] + row) * shape[1] + offset[1]) * esize;
        data[dst..dst + dims[1] * esize].copy_from_slice(&bytes[src..src + dims[1] * esize]);
    }

    Ok(())
}

pub const SQL_SCHEMA: [&str; 3] = [
    "create table if not exists groups (
    path text primary key
);",
    "create table if not exists datasets (
    path text primary key,
    dtype integer not null,
    rows integer not null,
    cols integer not null,
    data blob not null
);",
    "create table if not exists attributes (
    path text not null,
    name text not null,
    value integer not null,

    primary key (path, name)
);",
];
pub const SQL_SCHEMA_NUMBER: usize = SQL_SCHEMA.len();
