use crate::output::print_json;
use satplan_core::attitude::Quaternion;
use satplan_core::slew::{required_slew_time, SlewLimits};

/// Parse `w,x,y,z`.
pub fn parse_quaternion(s: &str) -> Result<Quaternion, String> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("'{p}': {e}")))
        .collect::<Result<_, _>>()?;
    match parts.as_slice() {
        [w, x, y, z] => Ok(Quaternion::new(*w, *x, *y, *z)),
        _ => Err(format!("expected 4 comma-separated numbers, got {}", parts.len())),
    }
}

pub fn run(
    from: &Quaternion,
    to: &Quaternion,
    velocity: f64,
    acceleration: f64,
    jerk: Option<f64>,
    settling: f64,
    json: bool,
) -> anyhow::Result<()> {
    let mut limits = SlewLimits::new(velocity, acceleration, settling);
    if let Some(j) = jerk {
        limits = limits.with_jerk(j);
    }

    let angle = from
        .angle_to_deg(to)
        .ok_or_else(|| anyhow::anyhow!("attitude quaternions must be non-zero"))?;
    let seconds = required_slew_time(from, to, &limits)?;

    if json {
        print_json(&serde_json::json!({
            "angle_deg": angle,
            "slew_time_s": seconds,
            "limits": limits,
        }))?;
    } else {
        println!("angle:     {angle:.3} deg");
        println!("slew time: {seconds:.3} s");
    }
    Ok(())
}
