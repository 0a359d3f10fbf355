//! Normalizes a text bag into CSV with provenance columns.
//!
//! The first record is the header; every following non-blank record is a data
//! row. Records end at line breaks outside double-quoted fields, so a quoted
//! cell may span lines. Two columns are appended: `processed_flag` (always `true`) and `source_key`.
//! Output depends only on the input bytes and the key, so re-runs of the same
//! job write identical objects.

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("source object is empty")]
    Empty,
    #[error("source object is not UTF-8 text: {0}")]
    NotText(String),
}

pub fn transform(input: &[u8], source_key: &str) -> Result<Vec<u8>, TransformError> {
    let text = std::str::from_utf8(input).map_err(|e| TransformError::NotText(e.to_string()))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut lines = records(text).filter(|l| !l.trim().is_empty());
    let header = lines.next().ok_or(TransformError::Empty)?;

    let key_cell = csv_cell(source_key);
    let mut out = String::with_capacity(text.len() + 64);
    out.push_str(header);
    out.push_str(",processed_flag,source_key\n");

    for row in lines {
        out.push_str(row);
        out.push_str(",true,");
        out.push_str(&key_cell);
        out.push('\n');
    }

    Ok(out.into_bytes())
}

/// Splits `text` into CSV records without breaking quoted fields.
fn records(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        let current = rest;
        if current.is_empty() {
            return None;
        }

        let mut quoted = false;
        let mut end = current.len();
        for (i, b) in current.bytes().enumerate() {
            match b {
                b'"' => quoted = !quoted,
                b'\n' if !quoted => {
                    end = i;
                    break;
                }
                _ => {}
            }
        }

        let record = &current[..end];
        rest = current.get(end + 1..).unwrap_or("");
        Some(record.strip_suffix('\r').unwrap_or(record))
    })
}

fn csv_cell(value: &str) -> String {
    if value.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_columns_to_header_and_rows() {
        let input = b"timestamp,topic,value\n1,/imu,0.5\n2,/gps,1.5\n";
        let out = transform(input, "robot_log_1.mcap").unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "timestamp,topic,value,processed_flag,source_key\n\
             1,/imu,0.5,true,robot_log_1.mcap\n\
             2,/gps,1.5,true,robot_log_1.mcap\n"
        );
    }

    #[test]
    fn is_deterministic() {
        let input = b"a,b\r\n1,2\r\n\r\n3,4";
        assert_eq!(transform(input, "k.mcap"), transform(input, "k.mcap"));
    }

    #[test]
    fn quotes_keys_that_need_it() {
        let out = transform(b"a\n1\n", "dir/odd,name.mcap").unwrap();
        assert!(String::from_utf8(out).unwrap().ends_with("1,true,\"dir/odd,name.mcap\"\n"));
    }

    #[test]
    fn quoted_fields_may_span_lines() {
        let input = b"id,note\n1,\"first line\nsecond, line\"\n2,\"say \"\"hi\"\"\"\n";
        let out = String::from_utf8(transform(input, "k.mcap").unwrap()).unwrap();
        assert_eq!(
            out,
            "id,note,processed_flag,source_key\n\
             1,\"first line\nsecond, line\",true,k.mcap\n\
             2,\"say \"\"hi\"\"\",true,k.mcap\n"
        );
    }

    #[test]
    fn rejects_empty_and_binary_input() {
        assert_eq!(transform(b"", "k.mcap"), Err(TransformError::Empty));
        assert_eq!(transform(b"\n  \n", "k.mcap"), Err(TransformError::Empty));
        assert!(matches!(
            transform(&[0xff, 0xfe, 0x00], "k.mcap"),
            Err(TransformError::NotText(_))
        ));
    }
}
