//! Parser for the monitoring tool's streamed output.
//!
//! pqos emits a header block followed by one data row per monitored group:
//!
//! ```text
//! TIME 2024-01-15 14:30:00
//!     CORE   LLC[KB]   MBL[MB/s]   MBR[MB/s]   MBT[MB/s]
//!  0-15,32-47  23040.0   1520.4      88.2      1608.6
//! ```
//!
//! Only rows shaped `<key> <other> <v0> .. <vN-1>` with numeric values are
//! data; everything else (headers, blank lines, banners) is not.

/// Number of measured bandwidth directions per data row.
pub const VARIANT_COUNT: usize = 3;

/// Index of the first value field; field 1 carries another counter we do not export.
const FIRST_VALUE_FIELD: usize = 2;

/// One data row from the monitoring tool.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// CPU-set key as printed by the tool (first field).
    pub source_key: String,
    /// Parsed values, in variant order.
    pub values: Vec<f64>,
}

impl Sample {
    pub fn variant_count(&self) -> usize {
        self.values.len()
    }
}

/// Parses one output line.
///
/// Returns `None` when the line has fewer than `2 + expected_variant_count`
/// fields or when any value field is not a decimal number. Such lines are
/// routine (headers, separators) and are not errors.
pub fn parse_line(line: &str, expected_variant_count: usize) -> Option<Sample> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < FIRST_VALUE_FIELD + expected_variant_count {
        return None;
    }

    let values = fields[FIRST_VALUE_FIELD..FIRST_VALUE_FIELD + expected_variant_count]
        .iter()
        .map(|f| f.parse::<f64>().ok())
        .collect::<Option<Vec<f64>>>()?;

    Some(Sample {
        source_key: fields[0].to_string(),
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_row() {
        let sample = parse_line("0,2 123.0 10.0 2.0 12.0", VARIANT_COUNT).unwrap();
        assert_eq!(sample.source_key, "0,2");
        assert_eq!(sample.values, vec![10.0, 2.0, 12.0]);
        assert_eq!(sample.variant_count(), 3);
    }

    #[test]
    fn test_parse_row_with_padding() {
        let line = "   0-15,32-47   23040.0   1520.4      88.2    1608.6  ";
        let sample = parse_line(line, VARIANT_COUNT).unwrap();
        assert_eq!(sample.source_key, "0-15,32-47");
        assert_eq!(sample.values, vec![1520.4, 88.2, 1608.6]);
    }

    #[test]
    fn test_parse_ignores_second_field() {
        let sample = parse_line("4-7 n/a 1 2 3", VARIANT_COUNT).unwrap();
        assert_eq!(sample.values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_parse_extra_trailing_fields_ignored() {
        let sample = parse_line("0-3 1.0 2.0 3.0 4.0 5.0", VARIANT_COUNT).unwrap();
        assert_eq!(sample.values, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_parse_header_is_not_data() {
        let line = "    CORE   LLC[KB]   MBL[MB/s]   MBR[MB/s]   MBT[MB/s]";
        assert!(parse_line(line, VARIANT_COUNT).is_none());
    }

    #[test]
    fn test_parse_short_lines_are_not_data() {
        assert!(parse_line("", VARIANT_COUNT).is_none());
        assert!(parse_line("   ", VARIANT_COUNT).is_none());
        assert!(parse_line("TIME 2024-01-15 14:30:00", VARIANT_COUNT).is_none());
        assert!(parse_line("0-3 1.0 2.0 3.0", VARIANT_COUNT).is_none());
    }

    #[test]
    fn test_parse_one_bad_value_rejects_line() {
        assert!(parse_line("0-3 1.0 2.0 x 4.0", VARIANT_COUNT).is_none());
        assert!(parse_line("0-3 1.0 2.0 3.0 4,0", VARIANT_COUNT).is_none());
    }

    #[test]
    fn test_parse_scientific_and_negative() {
        let sample = parse_line("0 x 1e3 -2.5 .5", VARIANT_COUNT).unwrap();
        assert_eq!(sample.values, vec![1000.0, -2.5, 0.5]);
    }

    #[test]
    fn test_parse_other_variant_counts() {
        let sample = parse_line("0 x 7", 1).unwrap();
        assert_eq!(sample.values, vec![7.0]);
        assert!(parse_line("0 x", 1).is_none());
    }
}
