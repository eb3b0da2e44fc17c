//! `nvidia-smi` query backend.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;

use super::{GpuAttributes, GpuReport, GpuTelemetry, TelemetryError};

/// Queried columns, in output order.
const QUERY: &str = "index,name,fan.speed,temperature.gpu,\
power.draw,power.limit,power.default_limit,\
clocks.gr,clocks.max.gr,clocks.sm,clocks.max.sm,\
clocks.mem,clocks.max.mem,clocks.video,clocks.max.video,driver_version";

const COLUMNS: usize = 16;

/// Reads GPU attributes through `nvidia-smi --query-gpu`.
///
/// The child is killed if the returned future is dropped, so a caller's
/// timeout also reaps a hung tool.
#[derive(Debug, Clone)]
pub struct NvidiaSmi {
    path: PathBuf,
}

impl NvidiaSmi {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl GpuTelemetry for NvidiaSmi {
    async fn read(&self) -> Result<GpuReport, TelemetryError> {
        let output = tokio::process::Command::new(&self.path)
            .arg(format!("--query-gpu={QUERY}"))
            .arg("--format=csv,noheader,nounits")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(TelemetryError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_csv(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse `--format=csv,noheader,nounits` output.
pub fn parse_csv(text: &str) -> Result<GpuReport, TelemetryError> {
    let mut report = GpuReport::default();

    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let cells: Vec<&str> = line.split(',').map(str::trim).collect();
        if cells.len() != COLUMNS {
            return Err(TelemetryError::Parse {
                line: line_no + 1,
                reason: format!("expected {COLUMNS} columns, found {}", cells.len()),
            });
        }

        let id = cells[0].parse().map_err(|_| TelemetryError::Parse {
            line: line_no + 1,
            reason: format!("bad GPU index {:?}", cells[0]),
        })?;

        report.gpus.push(GpuAttributes {
            id,
            product: text_cell(cells[1]),
            fan: number_cell(cells[2]),
            temp: number_cell(cells[3]),
            power: number_cell(cells[4]),
            power_limit: number_cell(cells[5]),
            power_limit_default: number_cell(cells[6]),
            gpu_clock: number_cell(cells[7]),
            gpu_clock_max: number_cell(cells[8]),
            sm_clock: number_cell(cells[9]),
            sm_clock_max: number_cell(cells[10]),
            mem_clock: number_cell(cells[11]),
            mem_clock_max: number_cell(cells[12]),
            video_clock: number_cell(cells[13]),
            video_clock_max: number_cell(cells[14]),
        });

        if report.driver_version.is_none() {
            report.driver_version = text_cell(cells[15]);
        }
    }

    Ok(report)
}

/// `[N/A]`, `[Not Supported]` and friends carry no value.
fn text_cell(cell: &str) -> Option<String> {
    (!cell.is_empty() && !cell.starts_with('[')).then(|| cell.to_string())
}

fn number_cell<T: std::str::FromStr>(cell: &str) -> Option<T> {
    text_cell(cell)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_GPUS: &str = "\
0, GeForce GTX 1070, 65, 61, 120.35, 125.00, 151.00, 1771, 1974, 1771, 1974, 4404, 4004, 1582, 1708, 390.77
1, GeForce GTX 1080 Ti, [N/A], 57, [Not Supported], 250.00, 250.00, 1480, 1911, 1480, 1911, 5505, 5505, 1303, 1620, 390.77
";

    #[test]
    fn parses_each_gpu_line() {
        let report = parse_csv(TWO_GPUS).unwrap();

        assert_eq!(report.driver_version.as_deref(), Some("390.77"));
        assert_eq!(report.gpus.len(), 2);

        let first = &report.gpus[0];
        assert_eq!(first.id, 0);
        assert_eq!(first.product.as_deref(), Some("GeForce GTX 1070"));
        assert_eq!(first.fan, Some(65));
        assert_eq!(first.temp, Some(61));
        assert_eq!(first.power, Some(120.35));
        assert_eq!(first.power_limit_default, Some(151.0));
        assert_eq!(first.mem_clock, Some(4404));
        assert_eq!(first.mem_clock_max, Some(4004));
    }

    #[test]
    fn unsupported_readings_are_none() {
        let report = parse_csv(TWO_GPUS).unwrap();
        let second = &report.gpus[1];
        assert_eq!(second.fan, None);
        assert_eq!(second.power, None);
        assert_eq!(second.power_limit, Some(250.0));
    }

    #[test]
    fn short_line_is_rejected() {
        let err = parse_csv("0, GeForce GTX 1070, 65\n").unwrap_err();
        assert!(matches!(err, TelemetryError::Parse { line: 1, .. }));
    }

    #[test]
    fn empty_output_has_no_gpus() {
        assert_eq!(parse_csv("\n").unwrap(), GpuReport::default());
    }

    #[tokio::test]
    async fn missing_tool_is_an_io_error() {
        let smi = NvidiaSmi::new("/nonexistent/nvidia-smi");
        assert!(matches!(smi.read().await, Err(TelemetryError::Io(_))));
    }
}
