//! PE image headers: DOS header, PE/COFF header and the section table.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use rdx_core::types::{DetectedFileType, FileTypeTag};
use rdx_schema::{FieldKind, SchemaDefinition};

use crate::parsed::{ParsedField, ParsedRepresentation, Span};
use crate::traits::SchemaParser;

const PE_SIGNATURE: u32 = 0x0000_4550;
const E_LFANEW_OFFSET: usize = 60;
const COFF_HEADER_LEN: usize = 20;
const SECTION_HEADER_LEN: usize = 40;

pub struct PeParser {
    schema: Arc<SchemaDefinition>,
}

impl PeParser {
    pub fn new(schema: Arc<SchemaDefinition>) -> Self {
        Self { schema }
    }
}

/// Little-endian integer of `width` bytes at `offset`, if in bounds.
fn int_field(data: &[u8], name: &str, kind: FieldKind, offset: usize, width: usize) -> Option<ParsedField> {
    let bytes = data.get(offset..offset.checked_add(width)?)?;
    let value = match width {
        2 => LittleEndian::read_u16(bytes) as i64,
        4 => LittleEndian::read_u32(bytes) as i64,
        _ => return None,
    };
    Some(ParsedField::integer(name, kind, value, Span::new(offset, width)))
}

fn int_value(field: &Option<ParsedField>) -> Option<i64> {
    match field.as_ref().map(|f| &f.value) {
        Some(crate::parsed::ParsedValue::Integer(v)) => Some(*v),
        _ => None,
    }
}

fn section(data: &[u8], at: usize) -> ParsedField {
    let mut children = vec![ParsedField::bytes(
        "name",
        FieldKind::String,
        &data[at..at + 8],
        Some(Span::new(at, 8)),
    )];
    let virtual_size = int_field(data, "virtual_size", FieldKind::Integer, at + 8, 4);
    let virtual_address = int_field(data, "virtual_address", FieldKind::Integer, at + 12, 4);
    let raw_size = int_field(data, "size_of_raw_data", FieldKind::Integer, at + 16, 4);
    let raw_ptr = int_field(data, "pointer_to_raw_data", FieldKind::OffsetOf, at + 20, 4);

    let raw_range = match (int_value(&raw_ptr), int_value(&raw_size)) {
        (Some(ptr), Some(size)) if size > 0 => {
            let (ptr, size) = (ptr as usize, size as usize);
            ptr.checked_add(size)
                .filter(|&end| end <= data.len())
                .map(|end| (ptr, end))
        }
        _ => None,
    };
    children.extend([virtual_size, virtual_address, raw_size, raw_ptr].into_iter().flatten());
    if let Some((start, end)) = raw_range {
        children.push(ParsedField::bytes(
            "raw_data",
            FieldKind::Bytes,
            &data[start..end],
            Some(Span::new(start, end - start)),
        ));
    }
    ParsedField::record("section", FieldKind::Record, children)
}

impl SchemaParser for PeParser {
    fn schema(&self) -> &Arc<SchemaDefinition> {
        &self.schema
    }

    fn can_parse(&self, file_type: &DetectedFileType, prefix: &[u8]) -> bool {
        file_type.tag == FileTypeTag::Pe32 || prefix.starts_with(b"MZ")
    }

    fn parse(&self, data: &[u8]) -> ParsedRepresentation {
        let mut rep = ParsedRepresentation::new(Arc::clone(&self.schema));

        let e_magic = int_field(data, "e_magic", FieldKind::Integer, 0, 2);
        let e_lfanew = int_field(data, "e_lfanew", FieldKind::Integer, E_LFANEW_OFFSET, 4);
        let pe_offset = int_value(&e_lfanew).map(|v| v as usize);
        let dos: Vec<ParsedField> = [e_magic, e_lfanew].into_iter().flatten().collect();
        if dos.is_empty() {
            rep.metadata.insert("pe_valid".into(), "false".into());
            return rep.finish();
        }
        rep.fields
            .push(ParsedField::record("dos_header", FieldKind::Record, dos));

        let signature = pe_offset.and_then(|pe| int_field(data, "signature", FieldKind::Integer, pe, 4));
        let (Some(pe), Some(PE_SIGNATURE)) = (pe_offset, int_value(&signature).map(|v| v as u32)) else {
            tracing::debug!("No PE signature, keeping DOS header only");
            rep.metadata.insert("pe_valid".into(), "false".into());
            return rep.finish();
        };

        let coff = pe + 4;
        let machine = int_field(data, "machine", FieldKind::Integer, coff, 2);
        let sections = int_field(data, "number_of_sections", FieldKind::Integer, coff + 2, 2);
        let timestamp = int_field(data, "time_date_stamp", FieldKind::Integer, coff + 4, 4);
        let optional = int_field(data, "size_of_optional_header", FieldKind::Integer, coff + 16, 2);
        let characteristics = int_field(data, "characteristics", FieldKind::Integer, coff + 18, 2);
        let section_count = int_value(&sections).unwrap_or(0) as usize;
        let optional_len = int_value(&optional).map(|v| v as usize);

        let header: Vec<ParsedField> = [signature, machine, sections, timestamp, optional, characteristics]
            .into_iter()
            .flatten()
            .collect();
        rep.fields
            .push(ParsedField::record("pe_header", FieldKind::Record, header));
        rep.metadata.insert("pe_valid".into(), "true".into());

        let mut table = Vec::new();
        if let Some(optional_len) = optional_len {
            let mut at = coff + COFF_HEADER_LEN + optional_len;
            for _ in 0..section_count {
                if at + SECTION_HEADER_LEN > data.len() {
                    tracing::debug!(offset = at, "Section table runs past end of file");
                    break;
                }
                table.push(section(data, at));
                at += SECTION_HEADER_LEN;
            }
        }
        rep.metadata.insert("sections".into(), table.len().to_string());
        rep.fields
            .push(ParsedField::record("sections", FieldKind::Array, table));
        rep.finish()
    }
}
