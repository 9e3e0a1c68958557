//! Fixed user-facing texts.
//!
//! Replies never include error `Display` output; everything a user can see
//! is built here.

use chrono::{DateTime, Utc};

use crate::driver::DemoRef;
use crate::server::{Credentials, ServerIdentity};

pub const ALREADY_BOOKED: &str = "You already have a server booked.";
pub const NOT_BOOKED: &str = "You don't have a server booked.";
pub const NONE_AVAILABLE: &str = "No servers are available right now, try again later.";
pub const SOMETHING_WENT_WRONG: &str = "Something went wrong, please try again.";
pub const DETAILS_SENT: &str = "Server details have been sent to you in a direct message.";
pub const START_FAILED: &str =
    "Your server failed to start. The booking has been cancelled, please book again.";
pub const STOP_FAILED: &str =
    "Your server could not be stopped cleanly. An admin has been notified.";
pub const NO_PERMISSION: &str = "You don't have permission to use that command.";
pub const DM_ONLY_IN_CHANNEL: &str = "That command can't be used in direct messages.";
pub const SHUTTING_DOWN: &str = "Shutting down.";

/// Public reply after a voluntary return.
pub fn returned(server_name: &str) -> String {
    format!("{server_name} has been returned. Thanks for playing!")
}

/// Presence text for the chat front-end.
pub fn presence_text(available: usize) -> String {
    match available {
        0 => "No servers available".to_string(),
        1 => "1 server available".to_string(),
        n => format!("{n} servers available"),
    }
}

/// Client console line that joins the server with both passwords.
pub fn connect_string(address: &str, credentials: &Credentials) -> String {
    format!(
        "connect {}; password {}; rcon_password {}",
        address, credentials.server_password, credentials.rcon_password
    )
}

/// Client console line for spectators.
pub fn spectator_string(stv_address: &str) -> String {
    format!("connect {stv_address}")
}

/// Full credentials DM sent after a booking.
pub fn booking_details(
    identity: &ServerIdentity,
    credentials: &Credentials,
    return_at: DateTime<Utc>,
    tip: Option<&str>,
) -> String {
    let mut text = format!(
        "**{}** is yours until {} UTC.\n\
         Address: `{}`\n\
         Password: `{}`\n\
         RCON password: `{}`\n\
         Connect: `{}`\n\
         SourceTV: `{}`",
        identity.name,
        return_at.format("%H:%M"),
        identity.address,
        credentials.server_password,
        credentials.rcon_password,
        connect_string(&identity.address, credentials),
        spectator_string(&identity.stv_address),
    );

    if let Some(tip) = tip {
        text.push_str("\nTip: ");
        text.push_str(tip);
    }

    text
}

/// Credentials resent by `send password`.
pub fn password_details(identity: &ServerIdentity, credentials: &Credentials) -> String {
    format!(
        "**{}**\nAddress: `{}`\nPassword: `{}`\nConnect: `{}`",
        identity.name,
        identity.address,
        credentials.server_password,
        connect_string(&identity.address, credentials),
    )
}

pub fn extended(server_name: &str, delta: &str, return_at: DateTime<Utc>) -> String {
    format!(
        "{server_name} has been extended by {delta}, it is now booked until {} UTC.",
        return_at.format("%H:%M")
    )
}

/// In-game chat line announcing an extension.
pub fn extended_in_game(delta: &str) -> String {
    format!("say Your booking has been extended by {delta}")
}

pub fn extension_limit(limit: u32) -> String {
    format!("Your booking has already been extended {limit} times, it can't be extended again.")
}

/// Demo list appended after a return.
pub fn demo_summary(demos: &[DemoRef]) -> Option<String> {
    if demos.is_empty() {
        return None;
    }

    let mut text = String::from("Recordings from your booking:");
    for demo in demos {
        text.push_str(&format!("\n{} ({}): {}", demo.name, demo.map_name, demo.url));
    }
    Some(text)
}

pub fn auto_returned_expired(mention: &str, server_name: &str) -> String {
    format!("{mention}, {server_name} has been auto-returned: time expired.")
}

pub fn auto_returned_idle(mention: &str, server_name: &str) -> String {
    format!("{mention}, {server_name} has been auto-returned: idle timeout.")
}

pub fn return_warning(server_name: &str, remaining: &str) -> String {
    format!(
        "{server_name} will be returned in {remaining}. Use `extend` if you need more time."
    )
}

pub fn idle_warning(server_name: &str, minutes: u32) -> String {
    format!(
        "{server_name} has had too few players for a while and will be returned in {minutes} minutes if it stays empty."
    )
}

pub fn lobby_warning(mention: &str, server_name: &str) -> String {
    format!(
        "{mention}, {server_name} looks like it is being used for an external lobby. \
         Booked servers are not for lobby use."
    )
}

/// Admin notification after repeated query failures.
pub fn query_failures(server_name: &str, attempts: u32, booker: Option<&str>) -> String {
    format!(
        "{server_name} failed to respond to {attempts} queries in a row (booker: {}).",
        booker.unwrap_or("unbooked")
    )
}

/// Admin notification for a failed stop.
pub fn stop_failed_admin(server_name: &str, booker: &str) -> String {
    format!("{server_name} could not be stopped after a return by {booker}.")
}

pub fn demos(url: &str) -> String {
    format!("Recordings are available at {url}")
}

pub fn version(revision: &str) -> String {
    format!("Running revision `{revision}`")
}

/// In-game reply to `!timeleft`.
pub fn time_left(remaining: &str) -> String {
    format!("say Time left on this booking: {remaining}")
}

pub const TIME_LEFT_UNBOOKED: &str = "say This server is not booked.";

pub fn report(server_name: &str, reporter: &str, profile_url: &str, reason: &str) -> String {
    format!("Report from {reporter} ({profile_url}) on {server_name}: {reason}")
}

pub const REPORT_SENT: &str = "say Your report has been sent to the admins.";
pub const REPORT_COOLDOWN: &str = "say You have reported recently, please wait before reporting again.";

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, "No servers available")]
    #[case(1, "1 server available")]
    #[case(2, "2 servers available")]
    #[case(12, "12 servers available")]
    fn test_presence_text(#[case] available: usize, #[case] expected: &str) {
        assert_eq!(presence_text(available), expected);
    }

    #[test]
    fn test_connect_string() {
        let creds = Credentials {
            rcon_password: "rcon123".into(),
            server_password: "pw456".into(),
        };
        assert_eq!(
            connect_string("1.2.3.4:27015", &creds),
            "connect 1.2.3.4:27015; password pw456; rcon_password rcon123"
        );
    }

    #[test]
    fn test_demo_summary() {
        assert!(demo_summary(&[]).is_none());

        let demo = DemoRef {
            name: "auto-20240101-1200-cp_process.dem".into(),
            map_name: "cp_process".into(),
            url: "https://demos.example/1".into(),
            uploaded_at: Utc::now(),
        };
        let text = demo_summary(&[demo]).unwrap();
        assert!(text.contains("https://demos.example/1"));
        assert!(text.contains("cp_process"));
    }

    #[test]
    fn test_query_failures_unbooked() {
        let text = query_failures("Server 1", 5, None);
        assert!(text.contains("unbooked"));
        assert!(text.contains('5'));
    }
}
