//! ICMP echo through the system `ping` utility.

use std::net::Ipv4Addr;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use super::ProbeOutcome;

/// Extra time granted to the child process beyond its own reply deadline.
const SPAWN_GRACE: Duration = Duration::from_millis(500);

/// Send one echo request; a reply within `timeout` counts as a response.
pub async fn ping(ip: Ipv4Addr, timeout: Duration) -> ProbeOutcome {
    let start = Instant::now();
    let mut cmd = Command::new("ping");
    cmd.args(ping_args(ip, timeout))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout + SPAWN_GRACE, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::debug!(ip = %ip, error = %e, "Failed to run ping");
            return ProbeOutcome::NoResponse;
        }
        Err(_) => return ProbeOutcome::NoResponse,
    };

    if !output.status.success() {
        return ProbeOutcome::NoResponse;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    match reply_latency(&stdout, start.elapsed(), timeout) {
        Some(latency) => ProbeOutcome::Responded {
            latency: Some(latency),
        },
        None => {
            tracing::debug!(ip = %ip, timeout_ms = timeout.as_millis() as u64, "Echo reply arrived late");
            ProbeOutcome::NoResponse
        }
    }
}

/// Latency of a successful ping run, or `None` when the reply came after
/// `timeout`. `ping` waits in whole seconds on Linux, so a late reply can
/// still exit successfully. Without a printed rtt the wall time is used.
pub fn reply_latency(output: &str, elapsed: Duration, timeout: Duration) -> Option<Duration> {
    let latency = parse_rtt(output).unwrap_or(elapsed);
    (latency <= timeout).then_some(latency)
}

/// Linux `ping -W` takes whole seconds; BSD/macOS takes milliseconds.
fn ping_args(ip: Ipv4Addr, timeout: Duration) -> Vec<String> {
    #[cfg(target_os = "macos")]
    let wait = timeout.as_millis().max(1).to_string();
    #[cfg(not(target_os = "macos"))]
    let wait = timeout.as_secs_f64().ceil().max(1.0).to_string();

    vec![
        "-n".to_string(),
        "-c".to_string(),
        "1".to_string(),
        "-W".to_string(),
        wait,
        ip.to_string(),
    ]
}

/// Round-trip time from a reply line such as `time=0.412 ms` or `time<1 ms`.
pub fn parse_rtt(output: &str) -> Option<Duration> {
    let at = output.find("time=").or_else(|| output.find("time<"))?;
    let rest = &output[at + 5..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let millis: f64 = rest[..end].parse().ok()?;
    Some(Duration::from_micros((millis * 1000.0).round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rtt_linux_output() {
        let out = "PING 192.168.1.1 (192.168.1.1) 56(84) bytes of data.\n\
                   64 bytes from 192.168.1.1: icmp_seq=1 ttl=64 time=2.48 ms\n";
        assert_eq!(parse_rtt(out), Some(Duration::from_micros(2480)));
    }

    #[test]
    fn parse_rtt_sub_millisecond_marker() {
        assert_eq!(
            parse_rtt("Reply from 10.0.0.1: bytes=32 time<1 ms TTL=64"),
            Some(Duration::from_millis(1))
        );
    }

    #[test]
    fn parse_rtt_absent() {
        assert_eq!(parse_rtt("1 packets transmitted, 0 received"), None);
    }

    #[test]
    fn late_reply_is_no_response() {
        let out = "64 bytes from 10.0.0.7: icmp_seq=1 ttl=64 time=900 ms\n";
        let timeout = Duration::from_millis(300);
        assert_eq!(reply_latency(out, Duration::from_millis(950), timeout), None);
        assert_eq!(
            reply_latency("time=120 ms", Duration::from_millis(950), timeout),
            Some(Duration::from_millis(120))
        );
    }

    #[test]
    fn elapsed_time_decides_without_rtt() {
        let timeout = Duration::from_millis(300);
        assert_eq!(reply_latency("", Duration::from_millis(900), timeout), None);
        assert_eq!(
            reply_latency("", Duration::from_millis(250), timeout),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn wait_argument_is_at_least_one_unit() {
        let args = ping_args(Ipv4Addr::new(10, 0, 0, 1), Duration::from_millis(300));
        assert_eq!(args.last().map(String::as_str), Some("10.0.0.1"));
        assert_ne!(args[4], "0");
    }
}
