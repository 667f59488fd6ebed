//! Call-control documents (TwiML)

use std::fmt::Write;

pub const CONTENT_TYPE: &str = "application/xml";

const FALLBACK_MESSAGE: &str =
    "We're sorry, this call cannot be connected right now. Please try again later. Goodbye.";

/// Document telling the provider to open a bidirectional media stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDocument {
    pub stream_url: String,
    /// Pass-through parameters, delivered in the stream's `start` message
    pub parameters: Vec<(String, String)>,
    /// Keeps the call up while the stream connects
    pub pause_secs: u32,
}

impl StreamDocument {
    pub fn new(stream_url: impl Into<String>) -> Self {
        Self {
            stream_url: stream_url.into(),
            parameters: Vec::new(),
            pause_secs: 40,
        }
    }

    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    pub fn pause(mut self, secs: u32) -> Self {
        self.pause_secs = secs;
        self
    }

    pub fn render(&self) -> String {
        let mut xml = String::with_capacity(256);
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<Response>\n  <Connect>\n");
        let _ = writeln!(xml, "    <Stream url=\"{}\">", escape(&self.stream_url));
        for (name, value) in &self.parameters {
            let _ = writeln!(
                xml,
                "      <Parameter name=\"{}\" value=\"{}\"/>",
                escape(name),
                escape(value)
            );
        }
        xml.push_str("    </Stream>\n  </Connect>\n");
        if self.pause_secs > 0 {
            let _ = writeln!(xml, "  <Pause length=\"{}\"/>", self.pause_secs);
        }
        xml.push_str("</Response>\n");
        xml
    }
}

/// Provider-safe answer for calls we cannot bridge: apologize and hang up
pub fn fallback_document() -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>\n  <Say>{}</Say>\n  <Hangup/>\n</Response>\n",
        escape(FALLBACK_MESSAGE)
    )
}

/// Empty document, acknowledges a callback without instructions
pub fn empty_document() -> String {
    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response/>\n".to_string()
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
