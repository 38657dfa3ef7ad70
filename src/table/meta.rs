//! Table metadata and its on-disk encoding.
//!
//! Packed little-endian: `num_attrs, num_pages, num_primary,
//! num_foreign` as `u32`, then the primary-key attribute names, the
//! attribute names, and the foreign (key, table) pairs as
//! length-prefixed strings, then one 5-byte type record per attribute.
//! `num_pages` is the authoritative record-page count of the table.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::errdata;
use crate::error::{Error, Result};
use crate::io::file::DataFile;
use crate::statement::ForeignRef;
use crate::storage::types::{DataType, RecordLayout};

#[derive(Debug, Clone, PartialEq)]
pub struct TableMeta {
    pub num_pages: u32,
    pub attr_names: Vec<String>,
    pub primary_key: Vec<String>,
    pub foreign: Vec<ForeignRef>,
    pub record_layout: RecordLayout,
}

impl TableMeta {
    pub fn build(
        attr_names: &[String],
        record_layout: &[DataType],
        primary_key: &[String],
        foreign: &[ForeignRef],
    ) -> Self {
        debug_assert_eq!(attr_names.len(), record_layout.len());
        Self {
            num_pages: 0,
            attr_names: attr_names.to_vec(),
            primary_key: primary_key.to_vec(),
            foreign: foreign.to_vec(),
            record_layout: record_layout.to_vec(),
        }
    }

    pub fn num_attrs(&self) -> usize {
        self.attr_names.len()
    }

    /// Position of an attribute within the record layout.
    pub fn attr_idx(&self, name: &str) -> Result<usize> {
        self.attr_names
            .iter()
            .position(|attr| attr == name)
            .ok_or_else(|| Error::InvalidRecord(format!("table has no attribute '{name}'")))
    }

    pub fn type_of(&self, name: &str) -> Result<DataType> {
        Ok(self.record_layout[self.attr_idx(name)?])
    }

    /// The layout of a projection onto the given attribute tuple.
    pub fn projected_layout(&self, attrs: &[String]) -> Result<RecordLayout> {
        attrs.iter().map(|attr| self.type_of(attr)).collect()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(self.attr_names.len() as u32).unwrap();
        buf.write_u32::<LittleEndian>(self.num_pages).unwrap();
        buf.write_u32::<LittleEndian>(self.primary_key.len() as u32).unwrap();
        buf.write_u32::<LittleEndian>(self.foreign.len() as u32).unwrap();

        for key in &self.primary_key {
            write_string(&mut buf, key);
        }
        for name in &self.attr_names {
            write_string(&mut buf, name);
        }
        for fref in &self.foreign {
            write_string(&mut buf, &fref.key);
            write_string(&mut buf, &fref.table);
        }
        for dtype in &self.record_layout {
            dtype.encode(&mut buf);
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let num_attrs = cursor.read_u32::<LittleEndian>()? as usize;
        let num_pages = cursor.read_u32::<LittleEndian>()?;
        let num_primary = cursor.read_u32::<LittleEndian>()? as usize;
        let num_foreign = cursor.read_u32::<LittleEndian>()? as usize;

        let primary_key = (0..num_primary)
            .map(|_| read_string(&mut cursor))
            .collect::<Result<Vec<_>>>()?;
        let attr_names = (0..num_attrs)
            .map(|_| read_string(&mut cursor))
            .collect::<Result<Vec<_>>>()?;
        let foreign = (0..num_foreign)
            .map(|_| {
                Ok(ForeignRef { key: read_string(&mut cursor)?, table: read_string(&mut cursor)? })
            })
            .collect::<Result<Vec<_>>>()?;
        let record_layout = (0..num_attrs)
            .map(|_| DataType::decode(&mut cursor))
            .collect::<Result<RecordLayout>>()?;

        Ok(Self { num_pages, attr_names, primary_key, foreign, record_layout })
    }

    pub fn write_to(&self, file: &DataFile) -> Result<()> {
        file.overwrite(&self.encode())
    }

    pub fn read_from(file: &DataFile) -> Result<Self> {
        Self::decode(&file.read_all()?)
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.write_u32::<LittleEndian>(s.len() as u32).unwrap();
    buf.extend_from_slice(s.as_bytes());
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let len = cursor.read_u32::<LittleEndian>()? as usize;
    if len > cursor.get_ref().len() {
        return Err(errdata!("string length {len} exceeds metadata size"));
    }
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| errdata!("attribute name is not valid utf-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta() -> TableMeta {
        let mut meta = TableMeta::build(
            &["id".into(), "score".into(), "name".into()],
            &[DataType::int(), DataType::float(), DataType::text(16)],
            &["id".into()],
            &[ForeignRef { key: "score".into(), table: "scores".into() }],
        );
        meta.num_pages = 7;
        meta
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let meta = meta();
        let decoded = TableMeta::decode(&meta.encode()).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let file = DataFile::create(dir.path().join("TABLE_META_DATA")).unwrap();
        let meta = meta();
        meta.write_to(&file).unwrap();
        assert_eq!(TableMeta::read_from(&file).unwrap(), meta);
    }

    #[test]
    fn test_truncated_metadata_errors() {
        let bytes = meta().encode();
        assert!(TableMeta::decode(&bytes[..bytes.len() - 3]).is_err());
        assert!(TableMeta::decode(&bytes[..7]).is_err());
    }

    #[test]
    fn test_attr_lookup() {
        let meta = meta();
        assert_eq!(meta.attr_idx("score").unwrap(), 1);
        assert!(meta.attr_idx("missing").is_err());
        assert_eq!(meta.type_of("name").unwrap(), DataType::text(16));
        assert_eq!(
            meta.projected_layout(&["name".into(), "id".into()]).unwrap(),
            vec![DataType::text(16), DataType::int()]
        );
    }
}
