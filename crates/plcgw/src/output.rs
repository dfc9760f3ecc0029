//! Output formatting for the `points` command.

use tabled::{Table, Tabled, settings::Style};

use plcgw_core::PointDefinition;

use crate::cli::OutputFormat;
use crate::error::CliError;

#[derive(Tabled)]
struct PointRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Type")]
    data_type: String,
    #[tabled(rename = "Scale")]
    scale: String,
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "RW")]
    access: &'static str,
}

impl From<&PointDefinition> for PointRow {
    fn from(p: &PointDefinition) -> Self {
        let address = match p.bit {
            Some(bit) => format!("DB{}.DBX{}.{bit}", p.db, p.offset),
            None => format!("DB{}.{}", p.db, p.offset),
        };
        let data_type = match p.length {
            Some(len) => format!("{}[{len}]", p.data_type),
            None => p.data_type.to_string(),
        };
        Self {
            id: p.id.clone(),
            name: p.name.clone().unwrap_or_default(),
            address,
            data_type,
            scale: p.scale.map(|s| s.to_string()).unwrap_or_default(),
            unit: p.unit.clone().unwrap_or_default(),
            access: if p.writable { "rw" } else { "r" },
        }
    }
}

pub fn render_points(points: &[PointDefinition], format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Table => {
            if points.is_empty() {
                return Ok("No data points configured.".into());
            }
            let rows: Vec<PointRow> = points.iter().map(PointRow::from).collect();
            Ok(Table::new(rows).with(Style::rounded()).to_string())
        }
        OutputFormat::Json => Ok(serde_json::to_string_pretty(points)?),
    }
}
