use crate::cmd::{block_on, open_console, LinkArgs};
use crate::output::{format_limits, format_value, print_json};
use axis_core::units;
use std::path::Path;

/// Talk to the controller for one axis without going through the registry,
/// and print exactly what came back.
pub fn run(root: &Path, link: &LinkArgs, axis_name: &str, json: bool) -> anyhow::Result<()> {
    block_on(async {
        let console = open_console(root, link)?;
        let axis = console.config().axis(axis_name)?.clone();
        let controller = console.engine().link().clone();

        let reading = controller.fetch_state_and_position(&axis).await;
        // Limit switches are only worth asking about once the axis answers.
        let status = match &reading {
            Ok(_) => Some(controller.fetch_status(&axis).await),
            Err(_) => None,
        };

        if json {
            let mut value = serde_json::json!({
                "endpoint": console.endpoint().to_string(),
                "bl_object": console.endpoint().bl_object,
                "axis": axis,
            });
            match &reading {
                Ok(r) => {
                    value["state"] = serde_json::json!(r.state);
                    value["position_pulse"] = serde_json::json!(r.position_pulse);
                    value["position"] = serde_json::json!(units::to_display(r.position_pulse, &axis));
                }
                Err(e) => value["error"] = serde_json::json!({ "kind": e.kind(), "message": e.to_string() }),
            }
            match &status {
                Some(Ok(limits)) => value["limits"] = serde_json::json!(limits),
                Some(Err(e)) => {
                    value["status_error"] =
                        serde_json::json!({ "kind": e.kind(), "message": e.to_string() })
                }
                None => {}
            }
            return print_json(&value);
        }

        println!("Axis:      {} ({})", axis.name, axis.display);
        println!("Endpoint:  {} object {}", console.endpoint(), console.endpoint().bl_object);
        println!(
            "Params:    val2pulse={} sense={} unit={}",
            axis.val2pulse,
            axis.sense.sign(),
            axis.unit
        );
        println!("----------------------------------");

        let reading = match reading {
            Ok(r) => r,
            Err(e) => {
                println!("No reading: {e}");
                anyhow::bail!("axis '{}' did not answer ({})", axis.name, e.kind());
            }
        };
        println!("State:     {:?}", reading.state);
        println!("Pulse:     {}", reading.position_pulse);
        println!(
            "Position:  {}",
            format_value(units::to_display(reading.position_pulse, &axis), axis.unit)
        );
        println!("----------------------------------");
        match status {
            Some(Ok(limits)) => {
                println!("Limits:    {}", format_limits(Some(&limits)));
                println!("Status:    {} (decimal)", limits.raw);
            }
            Some(Err(e)) => {
                println!("Limits:    unavailable ({e})");
                println!("Limit polling will be disabled for this axis while watching.");
            }
            None => {}
        }
        Ok(())
    })
}
