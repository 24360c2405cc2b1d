//! Minimal CSV field handling shared by the fact loader and the cube reader.

use std::borrow::Cow;
use std::io::{self, Write};

use memchr::{memchr, memchr_iter, memchr2_iter};

/// Iterates non-empty records with the 1-based line each starts on.
///
/// A newline inside a quoted field belongs to the record. A trailing `\r`
/// is stripped.
pub fn split_records(data: &[u8]) -> Records<'_> {
    Records {
        data,
        pos: 0,
        line: 0,
    }
}

pub struct Records<'a> {
    data: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Iterator for Records<'a> {
    type Item = (usize, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.data.len() {
            let start = self.pos;
            let line = self.line + 1;
            let mut in_quotes = false;
            let mut end = self.data.len();

            for i in memchr2_iter(b'\n', b'"', &self.data[start..]) {
                let i = start + i;
                if self.data[i] == b'"' {
                    in_quotes = !in_quotes;
                    continue;
                }
                self.line += 1;
                if !in_quotes {
                    end = i;
                    break;
                }
            }

            self.pos = end + 1;
            let record = &self.data[start..end];
            let record = record.strip_suffix(b"\r").unwrap_or(record);
            if !record.is_empty() {
                return Some((line, record));
            }
        }
        None
    }
}

/// Number of physical lines in `data`, counting an unterminated last line
pub fn count_lines(data: &[u8]) -> usize {
    memchr_iter(b'\n', data).count() + usize::from(!data.is_empty() && !data.ends_with(b"\n"))
}

/// Splits one line into fields.
///
/// Lines without a quote take the fast path and borrow from the input;
/// quoted fields are unescaped (`""` inside quotes is a literal quote).
pub fn split_fields<'a>(line: &'a [u8], out: &mut Vec<Cow<'a, [u8]>>) {
    out.clear();

    if memchr(b'"', line).is_none() {
        let mut field_start = 0;
        for comma_pos in memchr_iter(b',', line) {
            out.push(Cow::Borrowed(&line[field_start..comma_pos]));
            field_start = comma_pos + 1;
        }
        out.push(Cow::Borrowed(&line[field_start..]));
        return;
    }

    let mut field = Vec::new();
    let mut in_quotes = false;
    let mut i = 0;
    while i < line.len() {
        let b = line[i];
        match (in_quotes, b) {
            (true, b'"') if line.get(i + 1) == Some(&b'"') => {
                field.push(b'"');
                i += 1;
            }
            (true, b'"') => in_quotes = false,
            (false, b'"') => in_quotes = true,
            (false, b',') => out.push(Cow::Owned(std::mem::take(&mut field))),
            _ => field.push(b),
        }
        i += 1;
    }
    out.push(Cow::Owned(field));
}

/// Writes one field, quoting it when it contains a delimiter or quote
pub fn write_field<W: Write>(out: &mut W, field: &str) -> io::Result<()> {
    if field.contains([',', '"', '\n', '\r']) {
        write!(out, "\"{}\"", field.replace('"', "\"\""))
    } else {
        out.write_all(field.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(line: &str) -> Vec<String> {
        let mut out = Vec::new();
        split_fields(line.as_bytes(), &mut out);
        out.iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect()
    }

    #[test]
    fn test_split_records_skips_blank_and_crlf() {
        let records: Vec<(usize, &[u8])> = split_records(b"a,b\r\n\n1,2\n3,4").collect();
        assert_eq!(records, vec![(1, &b"a,b"[..]), (3, &b"1,2"[..]), (4, &b"3,4"[..])]);
        assert_eq!(count_lines(b"a,b\r\n\n1,2\n3,4"), 4);
        assert_eq!(count_lines(b"a\n"), 1);
        assert_eq!(count_lines(b""), 0);
    }

    #[test]
    fn test_quoted_newline_stays_in_record() {
        let data = b"k,v\n\"two\nlines\",1\nx,2\n";
        let records: Vec<(usize, &[u8])> = split_records(data).collect();
        assert_eq!(
            records,
            vec![(1, &b"k,v"[..]), (2, &b"\"two\nlines\",1"[..]), (4, &b"x,2"[..])]
        );
        assert_eq!(fields("\"two\nlines\",1"), vec!["two\nlines", "1"]);
    }

    #[test]
    fn test_split_plain_and_quoted_fields() {
        assert_eq!(fields("card,20,,x"), vec!["card", "20", "", "x"]);
        assert_eq!(
            fields("cash,15,\"[1, 3]\",\"say \"\"hi\"\"\""),
            vec!["cash", "15", "[1, 3]", "say \"hi\""]
        );
    }

    #[test]
    fn test_write_field_quotes_when_needed() {
        let mut buf = Vec::new();
        write_field(&mut buf, "[1, 3]").unwrap();
        buf.push(b'|');
        write_field(&mut buf, "cash").unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "\"[1, 3]\"|cash");
    }
}
