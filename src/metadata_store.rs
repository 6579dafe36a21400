use std::path::{Path, PathBuf};

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use rusqlite::{Connection, OpenFlags, params};

use crate::{
    analysis::find_year,
    error::{Error, Result},
    walker::is_supported,
};

/// One catalogued attachment from a reference manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogueRecord {
    /// Absolute path of the attachment file.
    pub path: PathBuf,
    pub title: String,
    /// Creators in catalogue order, "Last First".
    pub authors: Vec<String>,
    pub year: Option<u16>,
    pub tags: Vec<String>,
    pub collections: Vec<String>,
}

/// A structured source of paper metadata.
///
/// `records` returning an error means the store is unavailable; callers
/// fall back to local roots.
pub trait MetadataStore: Send + Sync {
    fn location(&self) -> &Path;
    fn records(&self) -> Result<Vec<CatalogueRecord>>;
}

/// Read-only access to a Zotero data directory (`zotero.sqlite` plus
/// `storage/<key>/<file>` attachments).
#[derive(Debug, Clone)]
pub struct ZoteroStore {
    dir: PathBuf,
}

const ATTACHMENTS_SQL: &str = "
    SELECT ia.parentItemID, ia.path, items.key
    FROM itemAttachments ia
    JOIN items ON items.itemID = ia.itemID
    WHERE ia.path LIKE 'storage:%'
    ORDER BY ia.itemID";

const FIELDS_SQL: &str = "
    SELECT f.fieldName, v.value
    FROM itemData d
    JOIN fields f ON f.fieldID = d.fieldID
    JOIN itemDataValues v ON v.valueID = d.valueID
    WHERE d.itemID = ?1 AND f.fieldName IN ('title', 'date')";

const CREATORS_SQL: &str = "
    SELECT c.firstName, c.lastName
    FROM itemCreators ic
    JOIN creators c ON c.creatorID = ic.creatorID
    WHERE ic.itemID = ?1
    ORDER BY ic.orderIndex";

const TAGS_SQL: &str = "
    SELECT t.name
    FROM itemTags it
    JOIN tags t ON t.tagID = it.tagID
    WHERE it.itemID = ?1
    ORDER BY t.name";

const COLLECTIONS_SQL: &str = "
    SELECT c.collectionName
    FROM collectionItems ci
    JOIN collections c ON c.collectionID = ci.collectionID
    WHERE ci.itemID = ?1
    ORDER BY c.collectionName";

impl ZoteroStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn database_path(&self) -> PathBuf {
        self.dir.join("zotero.sqlite")
    }

    fn storage_dir(&self) -> PathBuf {
        self.dir.join("storage")
    }

    /// Open the database without taking locks, so a running Zotero
    /// instance does not block the scan.
    fn connect(&self) -> Result<Connection> {
        let db = self.database_path();
        if !db.is_file() {
            return Err(Error::NotFound {
                kind: "metadata store",
                name: db.display().to_string(),
            });
        }
        let uri = format!("file:{}?immutable=1", uri_escape(&db));
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Ok(Connection::open_with_flags(uri, flags)?)
    }
}

impl MetadataStore for ZoteroStore {
    fn location(&self) -> &Path {
        &self.dir
    }

    fn records(&self) -> Result<Vec<CatalogueRecord>> {
        let conn = self.connect()?;
        let storage = self.storage_dir();

        let mut attachments = conn.prepare(ATTACHMENTS_SQL)?;
        let rows = attachments
            .query_map([], |row| {
                Ok((
                    row.get::<_, Option<i64>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut fields = conn.prepare(FIELDS_SQL)?;
        let mut creators = conn.prepare(CREATORS_SQL)?;
        let mut tags = conn.prepare(TAGS_SQL)?;
        let mut collections = conn.prepare(COLLECTIONS_SQL)?;

        let mut records = Vec::new();
        for (parent, stored_path, key) in rows {
            let Some(file_name) = stored_path.strip_prefix("storage:") else {
                continue;
            };
            let path = storage.join(&key).join(file_name);
            if !is_supported(&path) {
                continue;
            }

            let mut record = CatalogueRecord {
                path,
                ..Default::default()
            };

            if let Some(item) = parent {
                let values = fields
                    .query_map(params![item], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                for (name, value) in values {
                    match name.as_str() {
                        "title" => record.title = value.trim().to_string(),
                        "date" => record.year = find_year(&value),
                        _ => {}
                    }
                }

                record.authors = creators
                    .query_map(params![item], |row| {
                        let first: Option<String> = row.get(0)?;
                        let last: Option<String> = row.get(1)?;
                        Ok(format!(
                            "{} {}",
                            last.unwrap_or_default(),
                            first.unwrap_or_default()
                        )
                        .trim()
                        .to_string())
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                record.tags = tags
                    .query_map(params![item], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                record.collections = collections
                    .query_map(params![item], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
            }

            records.push(record);
        }

        tracing::debug!(
            store = %self.dir.display(),
            count = records.len(),
            "read catalogue"
        );
        Ok(records)
    }
}

/// Bytes SQLite's URI parser would read as delimiters or escapes. `/`
/// stays literal so the path keeps its structure.
const URI_PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn uri_escape(path: &Path) -> String {
    utf8_percent_encode(&path.to_string_lossy(), URI_PATH_ENCODE_SET).to_string()
}
