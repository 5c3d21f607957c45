//! FTP Response handling
//!
//! Defines FTP response codes, reply templates and formatting.

/// Standard FTP response codes
pub const OPENING_DATA: u16 = 150;
pub const OK: u16 = 200;
pub const NOT_NEEDED: u16 = 202;
pub const FILE_STATUS: u16 = 213;
pub const SYSTEM_TYPE: u16 = 215;
pub const FEATURES: u16 = 211;
pub const READY: u16 = 220;
pub const GOODBYE: u16 = 221;
pub const NO_TRANSFER: u16 = 225;
pub const TRANSFER_COMPLETE: u16 = 226;
pub const PASSIVE_MODE: u16 = 227;
pub const LOGIN_SUCCESS: u16 = 230;
pub const AUTH_OK: u16 = 234;
pub const FILE_ACTION_OK: u16 = 250;
pub const PATH_CREATED: u16 = 257;
pub const PASSWORD_REQUIRED: u16 = 331;
pub const PENDING_FURTHER_INFO: u16 = 350;
pub const SERVICE_UNAVAILABLE: u16 = 421;
pub const TRANSFER_ABORTED: u16 = 426;
pub const SYNTAX_ERROR: u16 = 500;
pub const BAD_PARAMETERS: u16 = 501;
pub const NOT_IMPLEMENTED: u16 = 502;
pub const BAD_SEQUENCE: u16 = 503;
pub const PARAMETER_NOT_IMPLEMENTED: u16 = 504;
pub const AUTH_FAILED: u16 = 530;
pub const SECURITY_UNAVAILABLE: u16 = 534;
pub const FILE_NOT_FOUND: u16 = 550;

/// Reply texts, keyed by what they report.
pub mod messages {
    pub const GREETING: &str = "RAX FTP server ready";
    pub const GOODBYE: &str = "Goodbye";
    pub const NOT_LOGGED_IN: &str = "Please login with USER and PASS";
    pub const USER_FIRST: &str = "Please enter the username first";
    pub const LOGIN_INCORRECT: &str = "Login incorrect";
    pub const IDLE_TIMEOUT: &str = "Idle timeout, closing control connection";
    pub const TOO_MANY_USERS: &str = "Too many users, try again later";
    pub const UNRECOGNIZED: &str = "Syntax error, command unrecognized";
    pub const TRANSFER_ABORTED: &str = "Connection closed; transfer aborted";
    pub const ABORT_SUCCESSFUL: &str = "ABOR command successful";
    pub const NO_TRANSFER: &str = "No transfer to abort";
    pub const NOOP: &str = "NOOP command successful";
    pub const SYSTEM: &str = "UNIX Type: L8";
}

/// Format an FTP response message
pub fn format_response(code: u16, message: &str) -> String {
    format!("{} {}\r\n", code, message)
}

/// Format a multi-line reply: `code-first`, indented body lines, `code last`.
pub fn format_multiline(code: u16, first: &str, body: &[String], last: &str) -> String {
    let mut reply = format!("{}-{}\r\n", code, first);
    for line in body {
        reply.push(' ');
        reply.push_str(line);
        reply.push_str("\r\n");
    }
    reply.push_str(&format_response(code, last));
    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiline_replies_bracket_the_body() {
        let reply = format_multiline(FEATURES, "Extensions supported:", &["MODE B".into()], "End");
        assert_eq!(reply, "211-Extensions supported:\r\n MODE B\r\n211 End\r\n");
    }
}
