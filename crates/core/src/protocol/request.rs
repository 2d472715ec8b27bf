use crate::error::{EgressError, ParseErrorKind};

/// A parsed RTSP request (RFC 2326 §6).
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. Anything after the
/// blank line is kept as the body; RTSP clients only send one with
/// SET_PARAMETER or GET_PARAMETER, which the server does not interpret.
#[derive(Debug)]
pub struct RtspRequest {
    pub method: String,
    /// Request-URI (e.g. `rtsp://host:8554/demo/cam1/track1`).
    pub uri: String,
    pub version: String,
    /// Headers in received order. Names are kept as sent.
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

fn parse_error(kind: ParseErrorKind) -> EgressError {
    EgressError::Parse { kind }
}

impl RtspRequest {
    /// Parse a complete request: request line, headers, blank line.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let (head, body) = match raw.split_once("\r\n\r\n") {
            Some((head, body)) => (head, body),
            None => (raw, ""),
        };
        let mut lines = head.lines();

        let request_line = lines
            .next()
            .filter(|line| !line.trim().is_empty())
            .ok_or_else(|| parse_error(ParseErrorKind::EmptyRequest))?;

        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(uri), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(parse_error(ParseErrorKind::InvalidRequestLine));
        };

        if version != "RTSP/1.0" {
            tracing::warn!(version, "client sent non-RTSP/1.0 version");
        }

        let headers = lines
            .take_while(|line| !line.is_empty())
            .map(|line| {
                line.split_once(':')
                    .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                    .ok_or_else(|| parse_error(ParseErrorKind::InvalidHeader))
            })
            .collect::<crate::error::Result<Vec<_>>>()?;

        Ok(RtspRequest {
            method: method.to_string(),
            uri: uri.to_string(),
            version: version.to_string(),
            headers,
            body: (!body.is_empty()).then(|| body.to_string()),
        })
    }

    /// Look up a header value by name, ignoring case.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// CSeq, echoed in every response (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// Session ID from the `Session` header, without its `;timeout=` suffix.
    pub fn session_id(&self) -> Option<&str> {
        self.get_header("Session")
            .map(|value| value.split(';').next().unwrap_or(value).trim())
            .filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_describe() {
        let raw = "DESCRIBE rtsp://gw:8554/demo/cam1 RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, "DESCRIBE");
        assert_eq!(req.uri, "rtsp://gw:8554/demo/cam1");
        assert_eq!(req.cseq(), Some("2"));
        assert_eq!(req.get_header("accept"), Some("application/sdp"));
        assert!(req.body.is_none());
    }

    #[test]
    fn session_header_strips_timeout() {
        let raw = "PLAY rtsp://gw/demo/cam1 RTSP/1.0\r\nCSeq: 4\r\nSession: ABCD1234;timeout=60\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.session_id(), Some("ABCD1234"));
    }

    #[test]
    fn body_is_kept() {
        let raw = "GET_PARAMETER rtsp://gw/demo/cam1 RTSP/1.0\r\nCSeq: 9\r\nContent-Length: 8\r\n\r\npackets\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.body.as_deref(), Some("packets\n"));
    }

    #[test]
    fn malformed_input() {
        assert!(RtspRequest::parse("").is_err());
        assert!(RtspRequest::parse("PLAY\r\n\r\n").is_err());
        assert!(RtspRequest::parse("PLAY rtsp://gw RTSP/1.0 extra\r\n\r\n").is_err());
        assert!(RtspRequest::parse("PLAY rtsp://gw RTSP/1.0\r\nno colon here\r\n\r\n").is_err());
    }
}
