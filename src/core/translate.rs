// Classify an engine return value as tabular or plain text and render it.
use crate::core::result::InterpretResult;
use crate::core::value::Value;

const COLUMN_NAME: &str = "name";
const COLUMN_DATA: &str = "data";

/// Borrowed view of one `{name, data}` column.
#[derive(Debug, Eq, PartialEq)]
pub struct Column<'a> {
    pub name: &'a str,
    pub cells: Vec<&'a str>,
}

/// Returns the columns when `value` is a non-empty list of `{name: Scalar,
/// data: List<Scalar>}` namespaces; any other shape yields `None`.
pub fn as_columns(value: &Value) -> Option<Vec<Column<'_>>> {
    let items = value.as_list()?;
    if items.is_empty() {
        return None;
    }
    items.iter().map(as_column).collect()
}

fn as_column(item: &Value) -> Option<Column<'_>> {
    let namespace = item.as_namespace()?;
    let name = namespace.get_scalar(COLUMN_NAME)?;
    let cells = namespace
        .get_list(COLUMN_DATA)?
        .iter()
        .map(Value::as_scalar)
        .collect::<Option<Vec<_>>>()?;
    Some(Column { name, cells })
}

/// Header row plus one row per index, truncated to the shortest column.
pub fn render_table(columns: &[Column<'_>]) -> String {
    let row_count = columns
        .iter()
        .map(|column| column.cells.len())
        .min()
        .unwrap_or(0);
    let longest = columns
        .iter()
        .map(|column| column.cells.len())
        .max()
        .unwrap_or(0);
    if longest != row_count {
        tracing::warn!(
            rows = row_count,
            dropped = longest - row_count,
            "ragged table columns truncated to the shortest column"
        );
    }

    let mut lines = Vec::with_capacity(row_count + 1);
    lines.push(
        columns
            .iter()
            .map(|column| column.name)
            .collect::<Vec<_>>()
            .join("\t"),
    );
    for row in 0..row_count {
        lines.push(
            columns
                .iter()
                .map(|column| column.cells[row])
                .collect::<Vec<_>>()
                .join("\t"),
        );
    }
    lines.join("\n")
}

pub fn translate(return_value: &Value, captured: String) -> InterpretResult {
    match as_columns(return_value) {
        Some(columns) => InterpretResult::table(render_table(&columns)),
        None => InterpretResult::text(captured),
    }
}

#[cfg(test)]
mod tests {
    use super::{as_columns, translate};
    use crate::core::result::{ResultKind, Status};
    use crate::core::value::{Namespace, Value};

    fn column(name: &str, data: &[&str]) -> Value {
        let namespace: Namespace = [
            ("name", Value::scalar(name)),
            ("data", Value::list(data.iter().copied())),
        ]
        .into_iter()
        .collect();
        Value::Namespace(namespace)
    }

    #[test]
    fn ragged_columns_truncate_to_shortest() {
        let value = Value::List(vec![
            column("a", &["1", "2", "3"]),
            column("b", &["4", "5"]),
        ]);
        let result = translate(&value, "ignored".to_string());
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.kind, ResultKind::Table);
        assert_eq!(result.payload, "a\tb\n1\t4\n2\t5");
    }

    #[test]
    fn empty_column_yields_header_only() {
        let value = Value::List(vec![column("a", &["1"]), column("b", &[])]);
        let result = translate(&value, String::new());
        assert_eq!(result.kind, ResultKind::Table);
        assert_eq!(result.payload, "a\tb");
    }

    #[test]
    fn scalar_list_is_text() {
        let value = Value::list(["1", "2"]);
        let result = translate(&value, "1\n2\n".to_string());
        assert_eq!(result.kind, ResultKind::Text);
        assert_eq!(result.payload, "1\n2\n");
    }

    #[test]
    fn non_table_shapes_are_text() {
        let mut missing_data = Namespace::new();
        missing_data.insert("name", Value::scalar("a"));
        let mut nested_cell = Namespace::new();
        nested_cell.insert("name", Value::scalar("a"));
        nested_cell.insert("data", Value::List(vec![Value::list(["x"])]));

        let cases = [
            Value::None,
            Value::scalar("x"),
            Value::List(Vec::new()),
            Value::Namespace(missing_data.clone()),
            Value::List(vec![Value::Namespace(missing_data)]),
            Value::List(vec![Value::Namespace(nested_cell)]),
            Value::List(vec![column("a", &["1"]), Value::scalar("stray")]),
        ];
        for value in cases {
            assert!(as_columns(&value).is_none(), "{value:?}");
            let result = translate(&value, "out".to_string());
            assert_eq!(result.kind, ResultKind::Text);
            assert_eq!(result.payload, "out");
        }
    }

    #[test]
    fn translation_is_deterministic() {
        let value = Value::List(vec![column("x", &["1"]), column("y", &["2"])]);
        let first = translate(&value, "a".to_string());
        let second = translate(&value, "a".to_string());
        assert_eq!(first, second);
        assert_eq!(first.payload, "x\ty\n1\t2");
    }
}
