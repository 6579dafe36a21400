use std::{collections::BTreeMap, path::Path};

use redb::{
    Database, Key, ReadOnlyDatabase, ReadOnlyTable, ReadTransaction, ReadableDatabase,
    ReadableTable, ReadableTableMetadata, TableDefinition, TableError, Value,
};

use crate::error::{Error, Result};

const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");
const INDEX_INFO: TableDefinition<&str, &str> = TableDefinition::new("index_info");

const HASH_SIZE: usize = 32;
/// Header size: 32 bytes text hash + 4 bytes dimension.
const HEADER_SIZE: usize = HASH_SIZE + 4;

pub type TextHash = [u8; HASH_SIZE];

/// BLAKE3 digest of an embedding input.
pub fn text_hash(text: &str) -> TextHash {
    *blake3::hash(text.as_bytes()).as_bytes()
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorRow {
    pub id: u64,
    /// Hash of the text the vector was computed from.
    pub text_hash: TextHash,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub model: String,
    pub dimension: usize,
}

/// One unit-normalized vector per document, keyed by document numeric ID.
///
/// Binary format per entry:
/// - 32 bytes: BLAKE3 hash of the embedding input
/// - 4 bytes: dimension D (u32 LE)
/// - D * 4 bytes: f32 LE values
pub struct VectorIndex {
    db: Handle,
}

enum Handle {
    Writable(Database),
    ReadOnly(ReadOnlyDatabase),
}

impl Handle {
    fn begin_read(&self) -> Result<ReadTransaction> {
        Ok(match self {
            Handle::Writable(db) => db.begin_read()?,
            Handle::ReadOnly(db) => db.begin_read()?,
        })
    }

    fn writable(&self) -> Result<&Database> {
        match self {
            Handle::Writable(db) => Ok(db),
            Handle::ReadOnly(_) => Err(Error::Config(
                "vector index was opened read-only".to_string(),
            )),
        }
    }
}

/// A table that was never created reads as empty.
fn open_read<K: Key + 'static, V: Value + 'static>(
    txn: &ReadTransaction,
    table: TableDefinition<'_, K, V>,
) -> Result<Option<ReadOnlyTable<K, V>>> {
    match txn.open_table(table) {
        Ok(table) => Ok(Some(table)),
        Err(TableError::TableDoesNotExist(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl VectorIndex {
    /// Open or create the vector index at the given path for building.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(VECTORS)?;
        txn.open_table(INDEX_INFO)?;
        txn.commit()?;

        Ok(Self {
            db: Handle::Writable(db),
        })
    }

    /// Open a built index for reading only. Never creates the file and
    /// never starts a write transaction.
    pub fn open_existing(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let db = ReadOnlyDatabase::open(path)?;
        Ok(Some(Self {
            db: Handle::ReadOnly(db),
        }))
    }

    pub fn info(&self) -> Result<Option<IndexInfo>> {
        let txn = self.db.begin_read()?;
        let Some(table) = open_read(&txn, INDEX_INFO)? else {
            return Ok(None);
        };
        let model = table.get("model")?.map(|g| g.value().to_string());
        let dimension = table
            .get("dimension")?
            .and_then(|g| g.value().parse::<usize>().ok());
        Ok(model.zip(dimension).map(|(model, dimension)| IndexInfo {
            model,
            dimension,
        }))
    }

    pub fn text_hashes(&self) -> Result<BTreeMap<u64, TextHash>> {
        Ok(self
            .load_all()?
            .into_iter()
            .map(|row| (row.id, row.text_hash))
            .collect())
    }

    /// Every row in id order. A corrupt row is a fatal alignment error.
    pub fn load_all(&self) -> Result<Vec<VectorRow>> {
        let txn = self.db.begin_read()?;
        let Some(table) = open_read(&txn, VECTORS)? else {
            return Ok(Vec::new());
        };

        let mut rows = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            let id = key.value();
            rows.push(decode(id, value.value()).ok_or_else(|| {
                Error::Misaligned(format!("corrupt vector row {id:016x}"))
            })?);
        }
        Ok(rows)
    }

    pub fn load(&self, id: u64) -> Result<Option<VectorRow>> {
        let txn = self.db.begin_read()?;
        let Some(table) = open_read(&txn, VECTORS)? else {
            return Ok(None);
        };
        let Some(guard) = table.get(id)? else {
            return Ok(None);
        };
        Ok(decode(id, guard.value()))
    }

    pub fn len(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        let Some(table) = open_read(&txn, VECTORS)? else {
            return Ok(0);
        };
        Ok(table.len()? as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Upsert and delete rows in a single transaction.
    pub fn apply(
        &self,
        info: &IndexInfo,
        upserts: &[VectorRow],
        deletes: &[u64],
    ) -> Result<()> {
        let txn = self.db.writable()?.begin_write()?;
        {
            let mut table = txn.open_table(VECTORS)?;
            for &id in deletes {
                table.remove(id)?;
            }
            for row in upserts {
                write_row(&mut table, row)?;
            }
            write_info(&txn, info)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Replace the whole index in a single transaction.
    pub fn replace_all(&self, info: &IndexInfo, rows: &[VectorRow]) -> Result<()> {
        let txn = self.db.writable()?.begin_write()?;
        txn.delete_table(VECTORS)?;
        {
            let mut table = txn.open_table(VECTORS)?;
            for row in rows {
                write_row(&mut table, row)?;
            }
            write_info(&txn, info)?;
        }
        txn.commit()?;
        Ok(())
    }
}

fn write_row(
    table: &mut redb::Table<'_, u64, &'static [u8]>,
    row: &VectorRow,
) -> Result<()> {
    let byte_len = HEADER_SIZE + std::mem::size_of_val(row.vector.as_slice());
    let mut guard = table.insert_reserve(row.id, byte_len)?;
    let dest = guard.as_mut();

    dest[..HASH_SIZE].copy_from_slice(&row.text_hash);
    dest[HASH_SIZE..HEADER_SIZE].copy_from_slice(&(row.vector.len() as u32).to_le_bytes());
    dest[HEADER_SIZE..].copy_from_slice(bytemuck::cast_slice(&row.vector));
    Ok(())
}

fn write_info(txn: &redb::WriteTransaction, info: &IndexInfo) -> Result<()> {
    let mut table = txn.open_table(INDEX_INFO)?;
    table.insert("model", info.model.as_str())?;
    table.insert("dimension", info.dimension.to_string().as_str())?;
    Ok(())
}

fn decode(id: u64, bytes: &[u8]) -> Option<VectorRow> {
    if bytes.len() < HEADER_SIZE {
        return None;
    }
    let text_hash: TextHash = bytes[..HASH_SIZE].try_into().ok()?;
    let dimension =
        u32::from_le_bytes(bytes[HASH_SIZE..HEADER_SIZE].try_into().ok()?) as usize;
    if bytes.len() != HEADER_SIZE + dimension * 4 {
        return None;
    }

    // redb values carry no alignment guarantee.
    let vector = bytes[HEADER_SIZE..]
        .chunks_exact(4)
        .map(bytemuck::pod_read_unaligned::<f32>)
        .collect();
    Some(VectorRow {
        id,
        text_hash,
        vector,
    })
}
