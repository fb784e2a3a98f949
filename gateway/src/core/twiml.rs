//! Call-control document builder.
//!
//! Produces the small XML documents the carrier fetches on call setup.
//! Three shapes exist: bridge the call to the model's SIP gateway, stream
//! audio to the gateway's own WebSocket bridge, or speak a static message.
//! Every user-supplied string is XML-escaped before it reaches a document.

use std::fmt::Write;
use std::str::FromStr;

/// Document mode requested by the carrier (or defaulted from env).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentMode {
    Sip,
    Stream,
    Simple,
}

impl DocumentMode {
    /// Parse with fallback: unknown values yield `None` so the caller can
    /// apply its own default chain (env default, then SIP).
    pub fn parse(value: &str) -> Option<Self> {
        value.parse().ok()
    }
}

impl FromStr for DocumentMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sip" => Ok(DocumentMode::Sip),
            "stream" => Ok(DocumentMode::Stream),
            "simple" => Ok(DocumentMode::Simple),
            _ => Err(()),
        }
    }
}

/// SIP URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SipScheme {
    #[default]
    Sip,
    /// `sips:` implies TLS without a transport parameter.
    Sips,
}

impl FromStr for SipScheme {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sip" => Ok(SipScheme::Sip),
            "sips" => Ok(SipScheme::Sips),
            _ => Err(()),
        }
    }
}

/// SIP transport parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SipTransport {
    #[default]
    Tls,
    Tcp,
    Udp,
}

impl SipTransport {
    fn as_str(self) -> &'static str {
        match self {
            SipTransport::Tls => "tls",
            SipTransport::Tcp => "tcp",
            SipTransport::Udp => "udp",
        }
    }
}

impl FromStr for SipTransport {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tls" => Ok(SipTransport::Tls),
            "tcp" => Ok(SipTransport::Tcp),
            "udp" => Ok(SipTransport::Udp),
            _ => Err(()),
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

#[derive(Debug, Clone)]
enum Element {
    Say(String),
    Pause(u32),
    Hangup,
    /// `<Start><Stream url="…"/></Start>`
    StartStream(String),
    /// `<Dial><Sip>…</Sip></Dial>`
    DialSip {
        uri: String,
        action: Option<String>,
    },
}

/// Builder for carrier control documents.
#[derive(Debug, Clone, Default)]
pub struct DocumentBuilder {
    elements: Vec<Element>,
}

impl DocumentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: &str) -> Self {
        self.elements.push(Element::Say(xml_escape(text)));
        self
    }

    pub fn pause(mut self, seconds: u32) -> Self {
        self.elements.push(Element::Pause(seconds));
        self
    }

    pub fn hangup(mut self) -> Self {
        self.elements.push(Element::Hangup);
        self
    }

    pub fn start_stream(mut self, url: &str) -> Self {
        self.elements.push(Element::StartStream(xml_escape(url)));
        self
    }

    pub fn dial_sip(mut self, uri: &str, action: Option<&str>) -> Self {
        self.elements.push(Element::DialSip {
            uri: xml_escape(uri),
            action: action.map(xml_escape),
        });
        self
    }

    /// Render the document with XML prologue.
    pub fn build(self) -> String {
        let mut xml =
            String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>");
        for element in self.elements {
            match element {
                Element::Say(text) => {
                    let _ = write!(xml, "<Say>{text}</Say>");
                }
                Element::Pause(length) => {
                    let _ = write!(xml, "<Pause length=\"{length}\"/>");
                }
                Element::Hangup => xml.push_str("<Hangup/>"),
                Element::StartStream(url) => {
                    let _ = write!(xml, "<Start><Stream url=\"{url}\"/></Start>");
                }
                Element::DialSip { uri, action } => match action {
                    Some(action) => {
                        let _ = write!(
                            xml,
                            "<Dial action=\"{action}\" method=\"POST\"><Sip>{uri}</Sip></Dial>"
                        );
                    }
                    None => {
                        let _ = write!(xml, "<Dial><Sip>{uri}</Sip></Dial>");
                    }
                },
            }
        }
        xml.push_str("</Response>");
        xml
    }
}

// =============================================================================
// Document shapes
// =============================================================================

/// Stream document: open a WebSocket to the bridge and keep the call up.
/// The credential rides in a URL path segment: some carriers strip query
/// strings from stream URLs.
pub fn stream_document(bridge_ws_base: &str, token: &str) -> String {
    let url = format!(
        "{}/{}",
        bridge_ws_base.trim_end_matches('/'),
        urlencoding::encode(token)
    );
    DocumentBuilder::new().start_stream(&url).pause(60).build()
}

/// SIP document: bridge the call straight to the model's SIP gateway,
/// authenticating with the ephemeral credential as the user part.
pub fn sip_document(
    token: &str,
    domain: &str,
    scheme: SipScheme,
    transport: SipTransport,
    port: Option<u16>,
    action: Option<&str>,
) -> String {
    let uri = sip_uri(token, domain, scheme, transport, port);
    DocumentBuilder::new().dial_sip(&uri, action).build()
}

/// Static spoken document for deployments where the bridge is unreachable.
pub fn simple_document(message: &str) -> String {
    DocumentBuilder::new().say(message).hangup().build()
}

/// Fail-closed document spoken when credential minting fails.
pub fn error_document() -> String {
    DocumentBuilder::new()
        .say("The service is unavailable right now. Please try again later.")
        .hangup()
        .build()
}

/// 403 body for a failed carrier-signature check.
pub fn forbidden_document() -> String {
    DocumentBuilder::new().say("Forbidden").build()
}

/// Build the SIP URI. `sips:` implies TLS, so no transport parameter is
/// appended; plain `sip:` carries an explicit transport (TLS by default,
/// whose well-known port is 5061).
pub fn sip_uri(
    token: &str,
    domain: &str,
    scheme: SipScheme,
    transport: SipTransport,
    port: Option<u16>,
) -> String {
    let mut uri = match scheme {
        SipScheme::Sip => format!("sip:{token}@{domain}"),
        SipScheme::Sips => format!("sips:{token}@{domain}"),
    };
    if let Some(port) = port {
        let _ = write!(uri, ":{port}");
    }
    if scheme == SipScheme::Sip {
        let _ = write!(uri, ";transport={}", transport.as_str());
    }
    uri
}

/// Escape XML-significant characters and control characters.
pub fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if c.is_control() && c != '\n' && c != '\t' => {
                let _ = write!(out, "&#x{:X};", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}
