//! Statistics display and formatting

use crate::sim::SimReport;
use std::time::Duration;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}.{:03}s", seconds, duration.subsec_millis())
    }
}

/// Format an 8-bit fixed point loss fraction as a percentage
pub fn format_fraction_lost(fraction: u8) -> String {
    format!("{:.1}%", f64::from(fraction) * 100.0 / 256.0)
}

/// Format jitter in media clock units as milliseconds
pub fn format_jitter(units: u32, clock_rate: u32) -> String {
    if clock_rate == 0 {
        return "N/A".to_string();
    }
    format!("{:.2}ms", f64::from(units) * 1000.0 / f64::from(clock_rate))
}

/// Display a simulation report
pub fn display_report(report: &SimReport, clock_rate: u32) {
    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ LINK                                                        │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!(
        "│ Frames:   {} sent / {} packets",
        report.frames_sent, report.packets_sent
    );
    println!("│ Lost:     {} on first transmission", report.packets_lost_on_link);
    println!(
        "│ Nacks:    {} requested / {} retransmitted",
        report.nacks_sent, report.retransmissions
    );
    println!("│ Elapsed:  {}", format_duration(report.elapsed));
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│ RECEIVE QUEUE                                               │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!(
        "│ Frames:   {} collected / {} keyframes",
        report.frames_collected, report.keyframes_collected
    );
    println!("│ Payload:  {}", format_bytes(report.bytes_collected));
    println!(
        "│ Packets:  {} received / {} rejected / {} dropped",
        report.stats.packets_received, report.rejected, report.dropped_packets
    );
    println!("│ Keyframe requests: {}", report.keyframe_requests);
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│ RECEIVER REPORT                                             │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!(
        "│ Fraction lost:     {}",
        format_fraction_lost(report.fraction_lost)
    );
    println!("│ Cumulative lost:   {}", report.cumulative_lost);
    println!(
        "│ Extended highest:  {}",
        report.extended_highest_sequence
    );
    println!(
        "│ Jitter:            {} ({} units)",
        format_jitter(report.interarrival_jitter, clock_rate),
        report.interarrival_jitter
    );
    println!("└─────────────────────────────────────────────────────────────┘");
}
