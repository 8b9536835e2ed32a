//! Chart proxy
//!
//! Read-only view over a chart's JSON grid. Row 0 is the header; every
//! following row is data.

use crate::error::{Result, ScriptError};
use crate::value::Value;
use qbscript_core::Chart;
use std::rc::Rc;

/// Parsed chart exposed to scripts through `Chart(name)`
#[derive(Debug)]
pub struct ChartProxy {
    name: String,
    header: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl ChartProxy {
    /// Parse a chart's `data` field
    pub fn new(chart: &Chart) -> Result<Self> {
        let grid: Vec<Vec<serde_json::Value>> =
            serde_json::from_str(&chart.data).map_err(|e| ScriptError::ChartParse {
                chart: chart.title.clone(),
                message: e.to_string(),
            })?;

        let mut grid = grid.into_iter();
        let header = grid
            .next()
            .unwrap_or_default()
            .iter()
            .map(|cell| match cell {
                serde_json::Value::String(s) => s.clone(),
                other => Value::from_json(other).to_string(),
            })
            .collect();
        let rows = grid
            .map(|row| row.iter().map(Value::from_json).collect())
            .collect();

        Ok(Self {
            name: chart.title.clone(),
            header,
            rows,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Number of data rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.header.iter().position(|h| h == column)
    }

    fn cell(&self, row: usize, column: usize) -> Value {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Every data-row value in `column`, in row order
    pub fn get(&self, column: &str) -> Result<Vec<Value>> {
        let index = self
            .column_index(column)
            .ok_or_else(|| ScriptError::ColumnNotFound {
                chart: self.name.clone(),
                column: column.to_string(),
            })?;

        if self.rows.is_empty() {
            return Err(ScriptError::EmptyChart(self.name.clone()));
        }

        Ok((0..self.rows.len()).map(|row| self.cell(row, index)).collect())
    }

    /// Rows whose `column` loosely equals `value`. A missing column matches
    /// nothing.
    pub fn row_where(self: &Rc<Self>, column: &str, value: &Value) -> Row {
        let matches = match self.column_index(column) {
            Some(index) => (0..self.rows.len())
                .filter(|&row| self.cell(row, index).loose_eq(value))
                .collect(),
            None => Vec::new(),
        };

        Row {
            chart: Rc::clone(self),
            matches,
        }
    }
}

/// Result of `rowWhere`: zero or more matched rows of one chart
#[derive(Debug)]
pub struct Row {
    chart: Rc<ChartProxy>,
    matches: Vec<usize>,
}

impl Row {
    /// Value at `header` in the first matched row. With no match the first
    /// data row is read instead; `null` when the header is unknown or the
    /// chart has no data.
    pub fn value_in_column(&self, header: &str) -> Value {
        let Some(column) = self.chart.column_index(header) else {
            return Value::Null;
        };
        let row = self.matches.first().copied().unwrap_or(0);
        self.chart.cell(row, column)
    }

    /// Number of matched rows
    pub fn count(&self) -> usize {
        self.matches.len()
    }

    pub fn chart(&self) -> &Rc<ChartProxy> {
        &self.chart
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels_chart() -> Rc<ChartProxy> {
        let chart = Chart {
            id: "chart-levels".into(),
            ruleset_id: "r1".into(),
            title: "Levels".into(),
            data: r#"[
                ["Level", "XP Required", "Ability Points"],
                [1, 0, 3],
                [2, 300, 6],
                ["3", 900, 9],
                [4, 2700, 12]
            ]"#
            .into(),
        };
        Rc::new(ChartProxy::new(&chart).unwrap())
    }

    #[test]
    fn test_get_column() {
        let chart = levels_chart();
        let xp = chart.get("XP Required").unwrap();
        let xp: Vec<f64> = xp.iter().filter_map(Value::as_number).collect();
        assert_eq!(xp, vec![0.0, 300.0, 900.0, 2700.0]);
    }

    #[test]
    fn test_get_missing_column() {
        let chart = levels_chart();
        let err = chart.get("Gold").unwrap_err();
        assert_eq!(
            err,
            ScriptError::ColumnNotFound {
                chart: "Levels".into(),
                column: "Gold".into()
            }
        );
    }

    #[test]
    fn test_get_empty_chart() {
        let chart = Chart {
            id: "c".into(),
            ruleset_id: "r".into(),
            title: "Empty".into(),
            data: r#"[["Level"]]"#.into(),
        };
        let proxy = ChartProxy::new(&chart).unwrap();
        assert_eq!(proxy.get("Level").unwrap_err(), ScriptError::EmptyChart("Empty".into()));
    }

    #[test]
    fn test_malformed_chart_names_chart() {
        let chart = Chart {
            id: "c".into(),
            ruleset_id: "r".into(),
            title: "Broken".into(),
            data: "[[1, 2".into(),
        };
        match ChartProxy::new(&chart) {
            Err(ScriptError::ChartParse { chart, .. }) => assert_eq!(chart, "Broken"),
            other => panic!("expected ChartParse, got {:?}", other),
        }
    }

    #[test]
    fn test_row_where_loose_match() {
        let chart = levels_chart();
        let row = chart.row_where("Level", &Value::Number(2.0));
        assert_eq!(row.count(), 1);
        assert!(matches!(row.value_in_column("Ability Points"), Value::Number(n) if n == 6.0));

        let row = chart.row_where("Level", &Value::Number(3.0));
        assert!(matches!(row.value_in_column("Ability Points"), Value::Number(n) if n == 9.0));

        let row = chart.row_where("Level", &Value::from("4"));
        assert!(matches!(row.value_in_column("XP Required"), Value::Number(n) if n == 2700.0));
    }

    #[test]
    fn test_row_where_miss_reads_first_row() {
        let chart = levels_chart();
        let row = chart.row_where("Level", &Value::Number(99.0));
        assert_eq!(row.count(), 0);
        assert!(matches!(row.value_in_column("Ability Points"), Value::Number(n) if n == 3.0));

        let row = chart.row_where("Tier", &Value::Number(2.0));
        assert!(matches!(row.value_in_column("XP Required"), Value::Number(n) if n == 0.0));
        assert!(matches!(row.value_in_column("Gold"), Value::Null));
    }
}
