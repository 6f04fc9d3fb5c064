use axis_core::registry::AxisSnapshot;
use axis_core::types::{LimitFlags, Unit};
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

/// One compact JSON document per line, for streaming output.
pub fn print_json_line<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let header_row: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    println!("{}", header_row.join("  ").trim_end());

    let sep: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    println!("{}", sep.join("  "));

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{:width$}", cell, width = w)
            })
            .collect();
        println!("{}", cells.join("  ").trim_end());
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Value in the axis's unit: integer for pulses, three decimals otherwise.
pub fn format_value(value: f64, unit: Unit) -> String {
    if unit.is_physical() {
        format!("{value:.3} {unit}")
    } else {
        format!("{value:.0} {unit}")
    }
}

pub fn format_position(snapshot: &AxisSnapshot) -> String {
    match snapshot.position_display {
        Some(v) => format_value(v, snapshot.axis.unit),
        None => "-".to_string(),
    }
}

pub fn format_limits(limits: Option<&LimitFlags>) -> String {
    let Some(l) = limits else {
        return "-".to_string();
    };
    let names: Vec<&str> = [
        (l.cw_hard, "CW-HARD"),
        (l.ccw_hard, "CCW-HARD"),
        (l.cw_soft, "CW-SOFT"),
        (l.ccw_soft, "CCW-SOFT"),
        (l.home, "HOME"),
    ]
    .into_iter()
    .filter_map(|(on, name)| on.then_some(name))
    .collect();
    if names.is_empty() {
        "ok".to_string()
    } else {
        names.join(",")
    }
}

/// Status cell: motion state, with markers for a failed refresh and an
/// outstanding move target.
pub fn format_state(snapshot: &AxisSnapshot) -> String {
    let mut s = snapshot.status.to_string();
    if snapshot.target_pulse.is_some() && snapshot.moving() {
        s.push('*');
    }
    if let Some(kind) = snapshot.last_error {
        s = format!("{s} ({kind} x{})", snapshot.consecutive_failures);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_render_per_unit() {
        assert_eq!(format_value(2.5, Unit::Mm), "2.500 mm");
        assert_eq!(format_value(-1200.0, Unit::Pulse), "-1200 pulse");
    }

    #[test]
    fn limits_render_active_switches() {
        assert_eq!(format_limits(None), "-");
        assert_eq!(format_limits(Some(&LimitFlags::from_bits(0))), "ok");
        assert_eq!(
            format_limits(Some(&LimitFlags::from_bits(0b10001))),
            "CW-HARD,HOME"
        );
    }
}
