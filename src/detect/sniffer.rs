//! Delimited-text sniffing.
//!
//! [`DelimitedSniffer::sniff`] recovers the delimiter, header presence and preamble length of a
//! text file that declares no schema. Trials start at line 0; each trial samples a byte window,
//! guesses the delimiter from per-line character frequencies, votes on whether the first row is a
//! header, and then checks that the next `lookahead_lines` rows all share the first row's width.
//! A failed trial moves the start forward (past the rows that matched, or by one line) until the
//! preamble budget is exhausted.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::error::{HarvestError, HarvestResult};

/// Bytes sampled per trial for delimiter and header detection.
pub const DEFAULT_WINDOW_BYTES: usize = 1024;
/// Rows after the first that must share its width.
pub const DEFAULT_LOOKAHEAD_LINES: usize = 100;
/// Largest preamble (in lines) the sniffer will skip.
pub const DEFAULT_MAX_PREAMBLE_LINES: usize = 500;

/// Tie-break order when several characters look like delimiters.
const PREFERRED_DELIMITERS: &[u8] = b",\t; :";
/// Rows examined when voting on the header.
const HEADER_VOTE_ROWS: usize = 20;
/// Lowest share of sample lines that must agree on a delimiter count.
const MIN_CONSISTENCY: f64 = 0.9;

/// How a delimited file is split into fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub delimiter: u8,
    pub quote: u8,
    /// Whitespace after a delimiter is not part of the field.
    pub skip_initial_space: bool,
}

impl Dialect {
    /// A `csv` reader configuration for this dialect.
    ///
    /// Headers are handled by the caller, and ragged rows are allowed so that widths can be
    /// inspected instead of raising.
    pub fn reader_builder(&self) -> csv::ReaderBuilder {
        let mut builder = csv::ReaderBuilder::new();
        builder
            .delimiter(self.delimiter)
            .quote(self.quote)
            .has_headers(false)
            .flexible(true);
        if self.skip_initial_space {
            builder.trim(csv::Trim::Fields);
        }
        builder
    }
}

/// Result of a successful sniff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SniffReport {
    pub dialect: Dialect,
    /// Whether the first row after the preamble names the columns.
    pub has_header: bool,
    /// Number of leading lines that are not part of the table.
    pub preamble_lines: usize,
    /// The skipped lines, verbatim; `None` when there is no preamble.
    pub preamble: Option<String>,
    /// Column names: the header row, or `column_0 .. column_{k-1}`.
    pub header: Vec<String>,
    /// Number of trials it took.
    pub attempts: usize,
}

enum Attempt {
    Detected(SniffReport),
    Retry(usize),
}

/// Heuristic detector for delimited text.
#[derive(Debug, Clone)]
pub struct DelimitedSniffer {
    pub window_bytes: usize,
    pub lookahead_lines: usize,
    pub max_preamble_lines: usize,
}

impl Default for DelimitedSniffer {
    fn default() -> Self {
        Self {
            window_bytes: DEFAULT_WINDOW_BYTES,
            lookahead_lines: DEFAULT_LOOKAHEAD_LINES,
            max_preamble_lines: DEFAULT_MAX_PREAMBLE_LINES,
        }
    }
}

impl DelimitedSniffer {
    /// Lines of a file the sniffer may need to look at; anything beyond is never read.
    pub fn head_lines(&self) -> usize {
        self.max_preamble_lines + self.lookahead_lines + 2
    }

    /// Detect the structure of `content`.
    ///
    /// `content` may be just the head of a file (see [`Self::head_lines`]). A leading UTF-8 BOM
    /// is ignored.
    pub fn sniff(&self, content: &str) -> HarvestResult<SniffReport> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let lines: Vec<&str> = content.split_inclusive('\n').collect();

        let mut offset = 0;
        let mut attempts = 0;
        while offset <= self.max_preamble_lines && offset < lines.len() {
            attempts += 1;
            match self.attempt(&lines, offset) {
                Attempt::Detected(mut report) => {
                    report.attempts = attempts;
                    debug!(
                        delimiter = %char::from(report.dialect.delimiter).escape_default(),
                        has_header = report.has_header,
                        preamble_lines = report.preamble_lines,
                        attempts,
                        "sniffed delimited structure"
                    );
                    return Ok(report);
                }
                Attempt::Retry(next) => {
                    trace!(offset, next, "sniff trial failed");
                    offset = next;
                }
            }
        }

        Err(HarvestError::DetectionExhausted {
            max_lines: self.max_preamble_lines,
        })
    }

    fn attempt(&self, lines: &[&str], offset: usize) -> Attempt {
        let rest = &lines[offset..];
        let checked = rest.len().min(self.lookahead_lines + 1);

        // A blank line is a zero-width row; blank lines that only trail the file are ignored.
        let blank = rest[..checked]
            .iter()
            .position(|l| is_blank(l))
            .filter(|&b| !rest[b..].iter().all(|l| is_blank(l)));
        if blank == Some(0) {
            return Attempt::Retry(offset + 1);
        }

        let sample = window(rest, self.window_bytes);
        let Some(dialect) = guess_dialect(&sample) else {
            return Attempt::Retry(offset + 1);
        };
        let has_header = guess_has_header(&sample, dialect);

        let text: String = rest[..blank.unwrap_or(checked)].concat();
        match (first_width_mismatch(&text, dialect, self.lookahead_lines), blank) {
            // Rows before the blank line matched; the table starts after it.
            (Ok(Verified::Consistent(_)), Some(b)) => Attempt::Retry(offset + b),
            (Ok(Verified::Consistent(width)), None) => {
                let header = match first_record(&text, dialect) {
                    Some(first) if has_header => dedupe(first),
                    _ => (0..width).map(|i| format!("column_{i}")).collect(),
                };
                let preamble = (offset > 0).then(|| lines[..offset].concat());
                Attempt::Detected(SniffReport {
                    dialect,
                    has_header,
                    preamble_lines: offset,
                    preamble,
                    header,
                    attempts: 0,
                })
            }
            // Skip the rows that matched; they cannot start the table either.
            (Ok(Verified::MismatchAtLine(line)), _) => Attempt::Retry(offset + line.max(1)),
            (Ok(Verified::Empty) | Err(_), _) => Attempt::Retry(offset + 1),
        }
    }
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Whole lines from the start of `lines` that fit in `max_bytes` (at least one line).
fn window(lines: &[&str], max_bytes: usize) -> String {
    let mut out = String::new();
    for line in lines {
        if !out.is_empty() && out.len() + line.len() > max_bytes {
            break;
        }
        out.push_str(line);
    }
    out
}

/// Guess the delimiter from how consistently each candidate character occurs per line.
fn guess_dialect(sample: &str) -> Option<Dialect> {
    let lines: Vec<&str> = sample
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return None;
    }

    let per_line: Vec<HashMap<u8, usize>> = lines.iter().map(|l| count_unquoted(l)).collect();
    let mut candidates: Vec<u8> = per_line.iter().flat_map(|m| m.keys().copied()).collect();
    candidates.sort_unstable();
    candidates.dedup();

    let total = lines.len() as f64;
    // (char, count mode, adjusted mode frequency)
    let modes: Vec<(u8, usize, f64)> = candidates
        .into_iter()
        .filter_map(|c| {
            let mut freq: HashMap<usize, usize> = HashMap::new();
            for counts in &per_line {
                *freq.entry(counts.get(&c).copied().unwrap_or(0)).or_default() += 1;
            }
            let (&mode, &mode_freq) = freq
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then(a.0.cmp(b.0)))?;
            let others: usize = freq.values().sum::<usize>() - mode_freq;
            let adjusted = mode_freq as f64 - others as f64;
            (mode > 0 && adjusted > 0.0).then_some((c, mode, adjusted))
        })
        .collect();

    let mut consistency = 1.0;
    let mut delims: Vec<(u8, usize, f64)> = Vec::new();
    while delims.is_empty() && consistency >= MIN_CONSISTENCY - 1e-9 {
        delims = modes
            .iter()
            .copied()
            .filter(|(_, _, adjusted)| adjusted / total >= consistency - 1e-9)
            .collect();
        consistency -= 0.01;
    }

    let delimiter = if delims.len() == 1 {
        delims[0].0
    } else {
        PREFERRED_DELIMITERS
            .iter()
            .copied()
            .find(|p| delims.iter().any(|(c, _, _)| c == p))
            .or_else(|| {
                delims
                    .iter()
                    .max_by(|a, b| a.1.cmp(&b.1).then(a.2.total_cmp(&b.2)))
                    .map(|(c, _, _)| *c)
            })?
    };

    let first = lines[0].as_bytes();
    let occurrences = first.iter().filter(|b| **b == delimiter).count();
    let followed_by_space = first
        .windows(2)
        .filter(|w| w[0] == delimiter && w[1] == b' ')
        .count();

    Some(Dialect {
        delimiter,
        quote: b'"',
        skip_initial_space: delimiter != b' ' && occurrences > 0 && occurrences == followed_by_space,
    })
}

/// Counts of candidate delimiter characters outside double-quoted sections.
fn count_unquoted(line: &str) -> HashMap<u8, usize> {
    let mut counts = HashMap::new();
    let mut in_quotes = false;
    for b in line.bytes() {
        if b == b'"' {
            in_quotes = !in_quotes;
            continue;
        }
        if !in_quotes && is_candidate(b) {
            *counts.entry(b).or_insert(0) += 1;
        }
    }
    counts
}

/// Printable ASCII punctuation, space or tab; never a quote or part of a number.
fn is_candidate(b: u8) -> bool {
    (b == b'\t' || b == b' ' || b.is_ascii_punctuation())
        && !matches!(b, b'"' | b'\'' | b'.' | b'-' | b'+')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Numeric,
    Len(usize),
}

fn cell_kind(cell: &str) -> CellKind {
    if cell.trim().parse::<f64>().is_ok() {
        CellKind::Numeric
    } else {
        CellKind::Len(cell.chars().count())
    }
}

/// Vote on whether the first row of `sample` is a header.
///
/// Each column whose type is consistent over the next rows votes: a header cell of a
/// different type (or, for text columns, a different length) counts for a header.
fn guess_has_header(sample: &str, dialect: Dialect) -> bool {
    let mut rdr = dialect.reader_builder().from_reader(sample.as_bytes());
    let mut records = rdr.records();
    let header = match records.next() {
        Some(Ok(rec)) => rec,
        _ => return false,
    };
    let columns = header.len();

    // None: not seen yet; Some(None): inconsistent, dropped from the vote.
    let mut kinds: Vec<Option<Option<CellKind>>> = vec![None; columns];
    for record in records.take(HEADER_VOTE_ROWS + 1) {
        let Ok(record) = record else { break };
        if record.len() != columns {
            continue;
        }
        for (col, slot) in kinds.iter_mut().enumerate() {
            let kind = cell_kind(&record[col]);
            *slot = match *slot {
                None => Some(Some(kind)),
                Some(Some(seen)) if seen != kind => Some(None),
                unchanged => unchanged,
            };
        }
    }

    let mut votes: i64 = 0;
    for (col, slot) in kinds.iter().enumerate() {
        match slot {
            Some(Some(CellKind::Len(len))) => {
                votes += if header[col].chars().count() != *len { 1 } else { -1 };
            }
            Some(Some(CellKind::Numeric)) => {
                votes += if cell_kind(&header[col]) == CellKind::Numeric { -1 } else { 1 };
            }
            Some(None) => {}
            // No rows to compare against: the lone row is taken as a header.
            None => votes += 1,
        }
    }
    votes > 0
}

enum Verified {
    Consistent(usize),
    /// 1-based line (relative to the trial start) of the first row with a different width.
    MismatchAtLine(usize),
    Empty,
}

fn first_width_mismatch(text: &str, dialect: Dialect, lookahead: usize) -> csv::Result<Verified> {
    let mut rdr = dialect.reader_builder().from_reader(text.as_bytes());
    let mut width = None;
    for record in rdr.records().take(lookahead + 1) {
        let record = record?;
        match width {
            None => width = Some(record.len()),
            Some(w) if w != record.len() => {
                let line = record.position().map(|p| p.line() as usize).unwrap_or(1);
                return Ok(Verified::MismatchAtLine(line.saturating_sub(1)));
            }
            Some(_) => {}
        }
    }
    Ok(width.map_or(Verified::Empty, Verified::Consistent))
}

fn first_record(text: &str, dialect: Dialect) -> Option<Vec<String>> {
    let mut rdr = dialect.reader_builder().from_reader(text.as_bytes());
    let record = rdr.records().next()?.ok()?;
    Some(record.iter().map(|f| f.trim().to_string()).collect())
}

/// Make header names unique by suffixing repeats with their position.
fn dedupe(names: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            if seen.insert(name.clone()) {
                name
            } else {
                let renamed = format!("{name}_{i}");
                seen.insert(renamed.clone());
                renamed
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(header: &str, delim: char, rows: usize) -> String {
        let mut out = String::new();
        if !header.is_empty() {
            out.push_str(header);
            out.push('\n');
        }
        for i in 0..rows {
            out.push_str(&format!("{i}{delim}{}{delim}{}\n", i as f64 * 0.5, i * 3));
        }
        out
    }

    /// Preamble lines with varying word counts so no single character is consistent.
    fn preamble(lines: usize) -> String {
        (0..lines)
            .map(|i| format!("meta{}\n", " x".repeat(i % 5)))
            .collect()
    }

    #[test]
    fn comma_with_header() {
        let text = table("time,voltage,current", ',', 30);
        let report = DelimitedSniffer::default().sniff(&text).unwrap();
        assert_eq!(report.dialect.delimiter, b',');
        assert!(report.has_header);
        assert_eq!(report.preamble_lines, 0);
        assert_eq!(report.preamble, None);
        assert_eq!(report.header, vec!["time", "voltage", "current"]);
    }

    #[test]
    fn semicolon_without_header_synthesizes_names() {
        let text = table("", ';', 30);
        let report = DelimitedSniffer::default().sniff(&text).unwrap();
        assert_eq!(report.dialect.delimiter, b';');
        assert!(!report.has_header);
        assert_eq!(report.header, vec!["column_0", "column_1", "column_2"]);
    }

    #[test]
    fn tab_delimited_with_header() {
        let text = table("a\tb\tc", '\t', 10);
        let report = DelimitedSniffer::default().sniff(&text).unwrap();
        assert_eq!(report.dialect.delimiter, b'\t');
        assert_eq!(report.header, vec!["a", "b", "c"]);
    }

    #[test]
    fn short_preamble_is_recovered_verbatim() {
        let pre = "Instrument: cycler 7\nOperator: someone\n\n";
        let text = format!("{pre}{}", table("t,v,i", ',', 120));
        let report = DelimitedSniffer::default().sniff(&text).unwrap();
        assert_eq!(report.preamble_lines, 3);
        assert_eq!(report.preamble.as_deref(), Some(pre));
        assert_eq!(report.header, vec!["t", "v", "i"]);
    }

    #[test]
    fn blank_line_ending_a_delimited_preamble_stays_in_the_preamble() {
        let pre = "Test report, generated 2023\n\n";
        let mut text = format!("{pre}\"Time, s\",Voltage,Note\n");
        for i in 0..120 {
            text.push_str(&format!("{i},{}.5,ok\n", 3 + i % 2));
        }
        let report = DelimitedSniffer::default().sniff(&text).unwrap();
        assert_eq!(report.preamble_lines, 2);
        assert_eq!(report.preamble.as_deref(), Some(pre));
        assert_eq!(report.dialect.delimiter, b',');
        assert_eq!(report.header, vec!["Time, s", "Voltage", "Note"]);
    }

    #[test]
    fn trailing_blank_lines_do_not_break_detection() {
        let text = format!("{}\n\n", table("a,b,c", ',', 10));
        let report = DelimitedSniffer::default().sniff(&text).unwrap();
        assert_eq!(report.preamble_lines, 0);
        assert_eq!(report.header, vec!["a", "b", "c"]);
    }

    #[test]
    fn recovers_preamble_length_across_sizes() {
        for p in [0usize, 1, 7, 64, 250, 499] {
            let text = format!("{}{}", preamble(p), table("a,b,c", ',', 110));
            let report = DelimitedSniffer::default().sniff(&text).unwrap();
            assert_eq!(report.preamble_lines, p, "preamble of {p} lines");
            assert_eq!(report.dialect.delimiter, b',');
            assert_eq!(report.header, vec!["a", "b", "c"]);
        }
    }

    #[test]
    fn skips_matching_rows_instead_of_single_lines() {
        // Four two-field metadata rows, then the table.
        let pre: String = (0..4).map(|i| format!("key{i};value{i}\n")).collect();
        let text = format!("{pre}{}", table("a;b;c", ';', 120));
        let report = DelimitedSniffer::default().sniff(&text).unwrap();
        assert_eq!(report.preamble_lines, 4);
        assert_eq!(report.attempts, 2);
    }

    #[test]
    fn exhausted_preamble_budget_is_a_detection_failure() {
        let sniffer = DelimitedSniffer {
            max_preamble_lines: 5,
            ..DelimitedSniffer::default()
        };
        let text = format!("{}{}", preamble(20), table("a,b,c", ',', 110));
        let err = sniffer.sniff(&text).unwrap_err();
        assert!(matches!(err, HarvestError::DetectionExhausted { max_lines: 5 }));
    }

    #[test]
    fn blank_input_is_exhausted() {
        let sniffer = DelimitedSniffer::default();
        assert!(sniffer.sniff("").is_err());
        assert!(sniffer.sniff("\n\n\n").is_err());
    }

    #[test]
    fn bom_is_ignored() {
        let text = format!("\u{feff}{}", table("a,b,c", ',', 5));
        let report = DelimitedSniffer::default().sniff(&text).unwrap();
        assert_eq!(report.header[0], "a");
    }

    #[test]
    fn space_after_delimiter_is_skipped() {
        let text = "a, b, c\n1, 2, 3\n4, 5, 6\n";
        let report = DelimitedSniffer::default().sniff(text).unwrap();
        assert_eq!(report.dialect.delimiter, b',');
        assert!(report.dialect.skip_initial_space);
        assert_eq!(report.header, vec!["a", "b", "c"]);
    }

    #[test]
    fn duplicate_header_names_are_made_unique() {
        assert_eq!(
            dedupe(vec!["v".into(), "v".into(), "i".into()]),
            vec!["v".to_string(), "v_1".to_string(), "i".to_string()]
        );
    }
}
