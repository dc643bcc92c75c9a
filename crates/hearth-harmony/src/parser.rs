//! Incremental XML decoding for the hub stream.
//!
//! The hub speaks one long-lived XML document per session, so decoding is
//! incremental: an `XmlStream` sits on the socket's read half and emits
//! tokens as bytes arrive. Decoded elements form a closed set — anything
//! outside the static (namespace, local-name) mapping is a hard protocol
//! error, never a lenient skip.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use tokio::io::AsyncBufRead;
use tracing::trace;

use crate::HarmonyError;

/// Namespace URIs used by the hub's restricted dialect.
pub mod ns {
    /// Client stanza namespace
    pub const JABBER_CLIENT: &str = "jabber:client";
    /// Streams namespace
    pub const STREAM: &str = "http://etherx.jabber.org/streams";
    /// SASL namespace
    pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
    /// Resource binding namespace
    pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
    /// Hub out-of-band action namespace
    pub const OA: &str = "connect.logitech.com";
}

/// A resolved start tag: (namespace, local-name) of the element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTag {
    /// Resolved namespace URI, if the name was bound to one
    pub namespace: Option<String>,
    /// Local part of the element name
    pub local: String,
}

impl StartTag {
    fn new(resolve: ResolveResult<'_>, local: &[u8]) -> Self {
        let namespace = match resolve {
            ResolveResult::Bound(namespace) => {
                Some(String::from_utf8_lossy(namespace.0).into_owned())
            }
            ResolveResult::Unbound => None,
            ResolveResult::Unknown(prefix) => Some(String::from_utf8_lossy(&prefix).into_owned()),
        };
        Self {
            namespace,
            local: String::from_utf8_lossy(local).into_owned(),
        }
    }

    /// Whether this tag opens a `<stream:stream>` document.
    pub fn is_stream_open(&self) -> bool {
        self.namespace.as_deref() == Some(ns::STREAM) && self.local == "stream"
    }

    /// Qualified name in Clark notation, for diagnostics.
    pub fn qualified(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{{{}}}{}", namespace, self.local),
            None => self.local.clone(),
        }
    }
}

/// Stream features advertised by the hub after a stream open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamFeatures {
    /// Advertised SASL mechanisms, in document order
    pub mechanisms: Vec<String>,
    /// Whether resource binding was advertised
    pub bind: bool,
}

/// SASL failure reported by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SaslFailure {
    /// Character data carried directly inside the failure element
    pub text: Option<String>,
    /// Local name of the first child element, the fallback message source
    pub condition: Option<String>,
}

impl SaslFailure {
    /// Human-readable failure message: the text content when present,
    /// otherwise the first child element's name.
    pub fn message(&self) -> String {
        self.text
            .clone()
            .or_else(|| self.condition.clone())
            .unwrap_or_else(|| "authentication failed".to_string())
    }
}

/// An info/query stanza. The hub's replies carry no usable correlation
/// data, so only the routing attributes and opaque content are kept.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientIq {
    /// The 'from' attribute
    pub from: Option<String>,
    /// The 'to' attribute
    pub to: Option<String>,
    /// The 'id' attribute
    pub id: Option<String>,
    /// The 'type' attribute
    pub iq_type: Option<String>,
    /// Opaque character data of the stanza body
    pub content: String,
}

/// A fully decoded top-level element read from the hub stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamElement {
    /// `<stream:features>` advertisement
    StreamFeatures(StreamFeatures),
    /// SASL `<success/>`
    SaslSuccess,
    /// SASL `<failure>`
    SaslFailure(SaslFailure),
    /// `<iq>` stanza
    ClientIq(ClientIq),
}

impl StreamElement {
    /// Element name, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StreamFeatures(_) => "stream:features",
            Self::SaslSuccess => "success",
            Self::SaslFailure(_) => "failure",
            Self::ClientIq(_) => "iq",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementKind {
    Features,
    Success,
    Failure,
    Iq,
}

/// Static dispatch from (namespace, local-name) to the element variant.
/// Returns `None` for anything outside the known set.
fn classify(tag: &StartTag) -> Option<ElementKind> {
    match (tag.namespace.as_deref(), tag.local.as_str()) {
        (Some(ns::STREAM), "features") => Some(ElementKind::Features),
        (Some(ns::SASL), "success") => Some(ElementKind::Success),
        (Some(ns::SASL), "failure") => Some(ElementKind::Failure),
        (Some(ns::JABBER_CLIENT), "iq") => Some(ElementKind::Iq),
        _ => None,
    }
}

fn collect_attributes(e: &BytesStart<'_>) -> Vec<(String, String)> {
    e.attributes()
        .flatten()
        .map(|attr| {
            (
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                String::from_utf8_lossy(&attr.value).into_owned(),
            )
        })
        .collect()
}

/// Incremental, namespace-aware token reader over the hub stream.
///
/// The underlying reader handles charset detection from the XML prologue,
/// since the device may advertise non-UTF-8 encodings.
pub struct XmlStream<R> {
    reader: NsReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> XmlStream<R> {
    /// Wrap a buffered byte source in a token reader.
    pub fn new(source: R) -> Self {
        let mut reader = NsReader::from_reader(source);
        // The outer stream:stream is never closed during a session, so end
        // tag balancing cannot be enforced at the document level.
        reader.config_mut().check_end_names = false;
        Self {
            reader,
            buf: Vec::with_capacity(4096),
        }
    }

    /// Scan forward to the next start tag, discarding every other token.
    ///
    /// Used only for detecting stream-open tags, which stay unclosed for
    /// the lifetime of the session.
    pub async fn next_start(&mut self) -> Result<StartTag, HarmonyError> {
        loop {
            self.buf.clear();
            let (resolve, event) = self
                .reader
                .read_resolved_event_into_async(&mut self.buf)
                .await?;
            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let tag = StartTag::new(resolve, e.local_name().as_ref());
                    trace!(element = %tag.qualified(), "start tag");
                    return Ok(tag);
                }
                Event::Eof => return Err(HarmonyError::ConnectionClosed),
                _ => continue,
            }
        }
    }

    /// Read the next full element and decode it into its typed variant.
    ///
    /// Unknown element names are a hard protocol error carrying the
    /// offending qualified name.
    pub async fn next_element(&mut self) -> Result<StreamElement, HarmonyError> {
        loop {
            let (tag, attributes, is_empty) = {
                self.buf.clear();
                let (resolve, event) = self
                    .reader
                    .read_resolved_event_into_async(&mut self.buf)
                    .await?;
                match event {
                    Event::Start(ref e) => (
                        StartTag::new(resolve, e.local_name().as_ref()),
                        collect_attributes(e),
                        false,
                    ),
                    Event::Empty(ref e) => (
                        StartTag::new(resolve, e.local_name().as_ref()),
                        collect_attributes(e),
                        true,
                    ),
                    Event::Eof => return Err(HarmonyError::ConnectionClosed),
                    _ => continue,
                }
            };

            let Some(kind) = classify(&tag) else {
                return Err(HarmonyError::UnexpectedElement {
                    name: tag.qualified(),
                });
            };
            trace!(element = %tag.qualified(), "decoding element");

            return match kind {
                ElementKind::Features => self
                    .decode_features(is_empty)
                    .await
                    .map(StreamElement::StreamFeatures),
                ElementKind::Success => {
                    if !is_empty {
                        self.skip_subtree().await?;
                    }
                    Ok(StreamElement::SaslSuccess)
                }
                ElementKind::Failure => self
                    .decode_failure(is_empty)
                    .await
                    .map(StreamElement::SaslFailure),
                ElementKind::Iq => self
                    .decode_iq(attributes, is_empty)
                    .await
                    .map(StreamElement::ClientIq),
            };
        }
    }

    async fn decode_features(&mut self, is_empty: bool) -> Result<StreamFeatures, HarmonyError> {
        let mut features = StreamFeatures::default();
        if is_empty {
            return Ok(features);
        }

        let mut depth = 1usize;
        let mut mechanism: Option<String> = None;
        while depth > 0 {
            self.buf.clear();
            let (resolve, event) = self
                .reader
                .read_resolved_event_into_async(&mut self.buf)
                .await?;
            match event {
                Event::Start(ref e) => {
                    let tag = StartTag::new(resolve, e.local_name().as_ref());
                    if tag.namespace.as_deref() == Some(ns::SASL) && tag.local == "mechanism" {
                        mechanism = Some(String::new());
                    } else if tag.namespace.as_deref() == Some(ns::BIND) && tag.local == "bind" {
                        features.bind = true;
                    }
                    depth += 1;
                }
                Event::Empty(ref e) => {
                    let tag = StartTag::new(resolve, e.local_name().as_ref());
                    if tag.namespace.as_deref() == Some(ns::BIND) && tag.local == "bind" {
                        features.bind = true;
                    }
                }
                Event::Text(ref t) => {
                    if let Some(current) = mechanism.as_mut() {
                        current.push_str(&t.unescape()?);
                    }
                }
                Event::End(_) => {
                    if let Some(done) = mechanism.take() {
                        features.mechanisms.push(done);
                    }
                    depth -= 1;
                }
                Event::Eof => return Err(HarmonyError::ConnectionClosed),
                _ => {}
            }
        }
        Ok(features)
    }

    async fn decode_failure(&mut self, is_empty: bool) -> Result<SaslFailure, HarmonyError> {
        let mut failure = SaslFailure::default();
        if is_empty {
            return Ok(failure);
        }

        let mut depth = 1usize;
        while depth > 0 {
            self.buf.clear();
            let (resolve, event) = self
                .reader
                .read_resolved_event_into_async(&mut self.buf)
                .await?;
            match event {
                Event::Start(ref e) => {
                    let tag = StartTag::new(resolve, e.local_name().as_ref());
                    if depth == 1 && failure.condition.is_none() {
                        failure.condition = Some(tag.local);
                    }
                    depth += 1;
                }
                Event::Empty(ref e) => {
                    let tag = StartTag::new(resolve, e.local_name().as_ref());
                    if depth == 1 && failure.condition.is_none() {
                        failure.condition = Some(tag.local);
                    }
                }
                Event::Text(ref t) => {
                    if depth == 1 {
                        let chunk = t.unescape()?;
                        let chunk = chunk.trim();
                        if !chunk.is_empty() {
                            failure
                                .text
                                .get_or_insert_with(String::new)
                                .push_str(chunk);
                        }
                    }
                }
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(HarmonyError::ConnectionClosed),
                _ => {}
            }
        }
        Ok(failure)
    }

    async fn decode_iq(
        &mut self,
        attributes: Vec<(String, String)>,
        is_empty: bool,
    ) -> Result<ClientIq, HarmonyError> {
        let mut iq = ClientIq::default();
        for (key, value) in attributes {
            match key.as_str() {
                "from" => iq.from = Some(value),
                "to" => iq.to = Some(value),
                "id" => iq.id = Some(value),
                "type" => iq.iq_type = Some(value),
                _ => {}
            }
        }
        if is_empty {
            return Ok(iq);
        }

        let mut depth = 1usize;
        while depth > 0 {
            self.buf.clear();
            let (_, event) = self
                .reader
                .read_resolved_event_into_async(&mut self.buf)
                .await?;
            match event {
                Event::Start(_) => depth += 1,
                Event::End(_) => depth -= 1,
                Event::Text(ref t) => iq.content.push_str(&t.unescape()?),
                Event::CData(ref t) => iq.content.push_str(&String::from_utf8_lossy(t)),
                Event::Eof => return Err(HarmonyError::ConnectionClosed),
                _ => {}
            }
        }
        Ok(iq)
    }

    async fn skip_subtree(&mut self) -> Result<(), HarmonyError> {
        let mut depth = 1usize;
        while depth > 0 {
            self.buf.clear();
            let (_, event) = self
                .reader
                .read_resolved_event_into_async(&mut self.buf)
                .await?;
            match event {
                Event::Start(_) => depth += 1,
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(HarmonyError::ConnectionClosed),
                _ => {}
            }
        }
        Ok(())
    }
}
