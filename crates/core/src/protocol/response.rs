/// An RTSP response (RFC 2326 §7).
///
/// Built by chaining [`add_header`](Self::add_header) and
/// [`with_body`](Self::with_body), then [`serialize`](Self::serialize)d.
/// `Content-Length` is added automatically when a body is present.
#[must_use]
#[derive(Debug)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// `Server` header value (RFC 2326 §12.36).
pub const SERVER_AGENT: &str = "rtsp-egress/0.1";

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request")
    }

    pub fn not_found() -> Self {
        Self::new(404, "Not Found")
    }

    /// 454: the `Session` header names no known session.
    pub fn session_not_found() -> Self {
        Self::new(454, "Session Not Found")
    }

    /// 455: valid method, but not for the session's current state.
    pub fn method_not_valid() -> Self {
        Self::new(455, "Method Not Valid in This State")
    }

    /// 461: no acceptable transport in the `Transport` header.
    pub fn unsupported_transport() -> Self {
        Self::new(461, "Unsupported Transport")
    }

    pub fn not_implemented() -> Self {
        Self::new(501, "Not Implemented")
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn serialize(&self) -> String {
        let mut response = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);

        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }

        match &self.body {
            Some(body) => {
                response.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
                response.push_str(body);
            }
            None => response.push_str("\r\n"),
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_response_names_the_server() {
        let s = RtspResponse::session_not_found()
            .add_header("CSeq", "7")
            .serialize();
        assert!(s.starts_with("RTSP/1.0 454 Session Not Found\r\n"));
        assert!(s.contains("Server: rtsp-egress/0.1\r\n"));
        assert!(s.contains("CSeq: 7\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[test]
    fn body_gets_content_length() {
        let s = RtspResponse::ok()
            .add_header("Content-Type", "application/sdp")
            .with_body("v=0\r\n".to_string())
            .serialize();
        assert!(s.contains("Content-Length: 5\r\n\r\nv=0\r\n"));
    }
}
