// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Minimal DNS message codec for DNS-SD browsing.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::ParseError;

pub(crate) const TYPE_A: u16 = 1;
pub(crate) const TYPE_PTR: u16 = 12;
pub(crate) const TYPE_TXT: u16 = 16;
pub(crate) const TYPE_SRV: u16 = 33;

const CLASS_IN: u16 = 0x0001;
const FLAG_RESPONSE: u16 = 0x8000;

/// Upper bound on compression pointers followed for one name.
const MAX_POINTER_JUMPS: usize = 16;

/// A decoded resource record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Record {
    Ptr { name: String, target: String },
    Srv { name: String, target: String, port: u16 },
    Txt { name: String, entries: BTreeMap<String, String> },
    A { name: String, addr: Ipv4Addr },
    Other,
}

/// A decoded DNS message; only the parts browsing needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Message {
    pub id: u16,
    pub is_response: bool,
    pub records: Vec<Record>,
}

fn truncated(e: std::io::Error) -> ParseError {
    ParseError::UnexpectedFormat(format!("truncated DNS message: {e}"))
}

/// Encodes a query for one or more names of the same type.
pub(crate) fn encode_query(id: u16, names: &[&str], qtype: u16) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(512);
    let count = u16::try_from(names.len()).unwrap_or(u16::MAX);
    out.write_u16::<BigEndian>(id)?;
    out.write_u16::<BigEndian>(0)?; // flags
    out.write_u16::<BigEndian>(count)?;
    out.write_u16::<BigEndian>(0)?; // answers
    out.write_u16::<BigEndian>(0)?; // authority
    out.write_u16::<BigEndian>(0)?; // additional

    for name in names.iter().take(usize::from(count)) {
        for label in name.trim_end_matches('.').split('.') {
            let bytes = label.as_bytes();
            let len = u8::try_from(bytes.len().min(63)).unwrap_or(63);
            out.write_u8(len)?;
            out.extend_from_slice(&bytes[..usize::from(len)]);
        }
        out.write_u8(0)?;
        out.write_u16::<BigEndian>(qtype)?;
        out.write_u16::<BigEndian>(CLASS_IN)?;
    }
    Ok(out)
}

/// Reads a possibly compressed name starting at the cursor position.
///
/// The cursor ends after the in-place part of the name. Returned names have
/// no trailing dot.
fn read_name(data: &[u8], cursor: &mut Cursor<&[u8]>) -> Result<String, ParseError> {
    let mut labels: Vec<String> = Vec::new();
    let mut position = usize::try_from(cursor.position()).unwrap_or(usize::MAX);
    let mut jumped = false;
    let mut jumps = 0;

    loop {
        let len = *data.get(position).ok_or_else(|| {
            ParseError::UnexpectedFormat("DNS name runs past message".to_string())
        })?;

        if len == 0 {
            position += 1;
            break;
        }

        if len & 0xc0 == 0xc0 {
            let low = *data.get(position + 1).ok_or_else(|| {
                ParseError::UnexpectedFormat("truncated DNS compression pointer".to_string())
            })?;
            if !jumped {
                cursor.set_position((position + 2) as u64);
            }
            jumped = true;
            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                return Err(ParseError::UnexpectedFormat(
                    "DNS compression loop".to_string(),
                ));
            }
            position = (usize::from(len & 0x3f) << 8) | usize::from(low);
            continue;
        }

        let start = position + 1;
        let end = start + usize::from(len);
        let label = data.get(start..end).ok_or_else(|| {
            ParseError::UnexpectedFormat("DNS label runs past message".to_string())
        })?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        position = end;
    }

    if !jumped {
        cursor.set_position(position as u64);
    }
    Ok(labels.join("."))
}

fn parse_txt(rdata: &[u8]) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    let mut rest = rdata;
    while let Some((&len, tail)) = rest.split_first() {
        let len = usize::from(len).min(tail.len());
        let (entry, next) = tail.split_at(len);
        let entry = String::from_utf8_lossy(entry);
        if let Some((key, value)) = entry.split_once('=') {
            entries.insert(key.to_ascii_lowercase(), value.to_string());
        } else if !entry.is_empty() {
            entries.insert(entry.to_ascii_lowercase(), String::new());
        }
        rest = next;
    }
    entries
}

fn parse_record(data: &[u8], cursor: &mut Cursor<&[u8]>) -> Result<Record, ParseError> {
    let name = read_name(data, cursor)?;
    let rtype = cursor.read_u16::<BigEndian>().map_err(truncated)?;
    let _class = cursor.read_u16::<BigEndian>().map_err(truncated)?;
    let _ttl = cursor.read_u32::<BigEndian>().map_err(truncated)?;
    let rdlen = cursor.read_u16::<BigEndian>().map_err(truncated)?;
    let rdata_start = usize::try_from(cursor.position()).unwrap_or(usize::MAX);
    let rdata_end = rdata_start + usize::from(rdlen);

    let mut rdata = vec![0; usize::from(rdlen)];
    cursor.read_exact(&mut rdata).map_err(truncated)?;

    let record = match rtype {
        TYPE_PTR => {
            let mut inner = Cursor::new(data);
            inner.set_position(rdata_start as u64);
            Record::Ptr {
                name,
                target: read_name(data, &mut inner)?,
            }
        }
        TYPE_SRV => {
            let mut inner = Cursor::new(data);
            inner.set_position(rdata_start as u64);
            let _priority = inner.read_u16::<BigEndian>().map_err(truncated)?;
            let _weight = inner.read_u16::<BigEndian>().map_err(truncated)?;
            let port = inner.read_u16::<BigEndian>().map_err(truncated)?;
            let target = read_name(data, &mut inner)?;
            Record::Srv { name, target, port }
        }
        TYPE_TXT => Record::Txt {
            name,
            entries: parse_txt(&rdata),
        },
        TYPE_A if rdata.len() == 4 => Record::A {
            name,
            addr: Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]),
        },
        _ => Record::Other,
    };

    cursor.set_position(rdata_end as u64);
    Ok(record)
}

fn skip_question(data: &[u8], cursor: &mut Cursor<&[u8]>) -> Result<(), ParseError> {
    read_name(data, cursor)?;
    cursor.read_u16::<BigEndian>().map_err(truncated)?;
    cursor.read_u16::<BigEndian>().map_err(truncated)?;
    Ok(())
}

/// Parses a DNS message, collecting records from every section.
pub(crate) fn parse_message(data: &[u8]) -> Result<Message, ParseError> {
    let mut cursor = Cursor::new(data);
    let id = cursor.read_u16::<BigEndian>().map_err(truncated)?;
    let flags = cursor.read_u16::<BigEndian>().map_err(truncated)?;
    let questions = cursor.read_u16::<BigEndian>().map_err(truncated)?;
    let answers = cursor.read_u16::<BigEndian>().map_err(truncated)?;
    let authority = cursor.read_u16::<BigEndian>().map_err(truncated)?;
    let additional = cursor.read_u16::<BigEndian>().map_err(truncated)?;

    for _ in 0..questions {
        skip_question(data, &mut cursor)?;
    }

    let total = usize::from(answers) + usize::from(authority) + usize::from(additional);
    let mut records = Vec::with_capacity(total);
    for _ in 0..total {
        records.push(parse_record(data, &mut cursor)?);
    }

    Ok(Message {
        id,
        is_response: flags & FLAG_RESPONSE != 0,
        records,
    })
}
