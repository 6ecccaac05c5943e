use anyhow::Context;
use std::process::Command;

/// Reads the SoC temperature, in °C, using the Raspberry Pi firmware's
/// `vcgencmd` tool.
pub fn temperature() -> anyhow::Result<f64> {
    let output = Command::new("vcgencmd")
        .arg("measure_temp")
        .output()
        .context("failed to run vcgencmd")?;
    anyhow::ensure!(
        output.status.success(),
        "vcgencmd exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_measure_temp(&stdout)
}

/// Parses `vcgencmd measure_temp` output, such as `temp=48.3'C`.
pub fn parse_measure_temp(output: &str) -> anyhow::Result<f64> {
    let output = output.trim();
    let temp = output
        .strip_prefix("temp=")
        .and_then(|rest| rest.strip_suffix("'C"))
        .with_context(|| format!("unexpected vcgencmd output {output:?}"))?;
    temp.parse()
        .with_context(|| format!("invalid temperature {temp:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_vcgencmd_output() {
        assert_eq!(parse_measure_temp("temp=48.3'C\n").unwrap(), 48.3);
        assert_eq!(parse_measure_temp("temp=-1.0'C").unwrap(), -1.0);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_measure_temp("").is_err());
        assert!(parse_measure_temp("temp=hot'C").is_err());
        assert!(parse_measure_temp("error=1 error_msg=\"Command not registered\"").is_err());
    }
}
