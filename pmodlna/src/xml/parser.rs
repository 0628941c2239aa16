//! Parseur XML incrémental.

use std::sync::Arc;

use quick_xml::escape::unescape;

use crate::strings::StringRegistry;

/// Événement produit par le parseur.
///
/// `name` et `text` ne sont valides que pour l'événement courant ; un
/// appelant qui les conserve en copie la valeur (le nom est interné et la
/// copie est donc bon marché).
#[derive(Debug, Clone)]
pub struct XmlEvent {
    /// Nom local de l'élément, préfixe de namespace retiré.
    pub name: Arc<str>,

    /// Chemin des éléments ouverts, élément courant inclus
    /// (ex: `/root/device/UDN`).
    pub path: String,

    /// Texte rogné pour un événement texte, vide pour une ouverture.
    pub text: String,

    /// Fragment d'attributs brut capturé au dernier tag ouvrant.
    pub attributes: String,
}

impl XmlEvent {
    /// Vrai pour un événement d'ouverture d'élément.
    pub fn is_start(&self) -> bool {
        self.text.is_empty()
    }

    /// Profondeur du chemin (nombre de composantes).
    pub fn depth(&self) -> usize {
        self.path.matches('/').count()
    }
}

/// Parseur XML incrémental sur buffer en append seul.
///
/// Le parseur maintient un curseur, une pile des éléments ouverts et le
/// dernier fragment d'attributs rencontré. [`next_event`](Self::next_event)
/// avance depuis le curseur et restitue le premier fragment significatif :
///
/// - un tag ouvrant produit un événement au texte vide ; un tag
///   auto-fermant produit le même événement mais la pile est dépilée avant
///   le retour ;
/// - un texte non vide produit un événement portant l'élément englobant ;
/// - un tag fermant dépile sans produire d'événement.
///
/// Commentaires, instructions de traitement et déclarations sont ignorés.
/// Un tag incomplet en fin de buffer n'est pas une erreur : le parseur
/// attend des octets supplémentaires. Une entrée malformée termine le
/// parsing silencieusement, sans erreur fatale.
pub struct XmlPullParser {
    buf: Vec<u8>,
    cursor: usize,
    stack: Vec<Arc<str>>,
    last_attributes: String,
    decode_entities: bool,
    names: StringRegistry,
}

impl XmlPullParser {
    pub fn new(decode_entities: bool) -> Self {
        Self {
            buf: Vec::new(),
            cursor: 0,
            stack: Vec::new(),
            last_attributes: String::new(),
            decode_entities,
            names: StringRegistry::new(),
        }
    }

    /// Ajoute des octets à la fin du buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Position du curseur dans le buffer, en octets consommés.
    pub fn consumed(&self) -> usize {
        self.cursor
    }

    /// Supprime le préfixe consommé du buffer.
    pub fn compact(&mut self) {
        if self.cursor > 0 {
            self.buf.drain(..self.cursor);
            self.cursor = 0;
        }
    }

    /// Remet le parseur à l'état initial pour un nouveau document.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.cursor = 0;
        self.stack.clear();
        self.last_attributes.clear();
    }

    /// Restitue le prochain événement, ou `None` si le buffer est épuisé
    /// ou se termine sur un fragment incomplet.
    pub fn next_event(&mut self) -> Option<XmlEvent> {
        loop {
            let rest = &self.buf[self.cursor..];
            if rest.is_empty() {
                return None;
            }

            if rest[0] == b'<' {
                if let Some(skipped) = skip_non_element(rest) {
                    if skipped == 0 {
                        // Fragment incomplet, attendre la suite.
                        return None;
                    }
                    self.cursor += skipped;
                    continue;
                }

                let Some(gt) = find_byte(rest, b'>') else {
                    // Tag incomplet, attendre la suite.
                    return None;
                };
                let inner = &rest[1..gt];
                self.cursor += gt + 1;

                if inner.first() == Some(&b'/') {
                    self.stack.pop();
                    continue;
                }

                let self_closing = inner.last() == Some(&b'/');
                let content = if self_closing {
                    &inner[..inner.len() - 1]
                } else {
                    inner
                };
                let content = String::from_utf8_lossy(content);
                let content = content.trim();
                if content.is_empty() {
                    // Tag vide "<>", on passe.
                    continue;
                }

                let (raw_name, attributes) = match content.find(char::is_whitespace) {
                    Some(split) => (&content[..split], content[split..].trim()),
                    None => (content, ""),
                };
                let name = self.names.intern(local_name(raw_name));
                self.last_attributes.clear();
                self.last_attributes.push_str(attributes);

                self.stack.push(name.clone());
                let path = self.path_string();
                if self_closing {
                    self.stack.pop();
                }

                return Some(XmlEvent {
                    name,
                    path,
                    text: String::new(),
                    attributes: self.last_attributes.clone(),
                });
            }

            // Plage de texte jusqu'au prochain '<'.
            let Some(lt) = find_byte(rest, b'<') else {
                // Texte possiblement incomplet, attendre la suite.
                return None;
            };
            let raw = String::from_utf8_lossy(&rest[..lt]);
            let trimmed = raw.trim();
            if trimmed.is_empty() || self.stack.is_empty() {
                self.cursor += lt;
                continue;
            }

            let text = if self.decode_entities {
                decode_text(trimmed)
            } else {
                trimmed.to_string()
            };
            self.cursor += lt;

            let name = self.stack.last().cloned()?;
            return Some(XmlEvent {
                name,
                path: self.path_string(),
                text,
                attributes: self.last_attributes.clone(),
            });
        }
    }

    fn path_string(&self) -> String {
        let mut path = String::new();
        for element in &self.stack {
            path.push('/');
            path.push_str(element);
        }
        path
    }
}

/// Compose le parseur avec un puits en append seul.
///
/// L'appelant écrit les octets au fil de leur arrivée depuis un corps HTTP
/// puis draine les événements ; après chaque événement le préfixe consommé
/// est retiré du buffer. `reset` permet de réutiliser l'instance pour un
/// corps suivant.
pub struct XmlStream {
    parser: XmlPullParser,
}

impl XmlStream {
    pub fn new(decode_entities: bool) -> Self {
        Self {
            parser: XmlPullParser::new(decode_entities),
        }
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.parser.push(bytes);
    }

    pub fn next_event(&mut self) -> Option<XmlEvent> {
        let event = self.parser.next_event();
        if event.is_some() {
            self.parser.compact();
        }
        event
    }

    pub fn reset(&mut self) {
        self.parser.reset();
    }
}

/// Décode les entités HTML d'un texte, en gardant le texte brut si le
/// décodage échoue.
pub fn decode_text(raw: &str) -> String {
    match unescape(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

fn find_byte(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|b| *b == needle)
}

/// Saute commentaires, instructions de traitement et déclarations.
///
/// Retourne `None` si `rest` ne commence pas par un tel fragment,
/// `Some(0)` si le fragment est incomplet, sinon sa longueur.
fn skip_non_element(rest: &[u8]) -> Option<usize> {
    if rest.starts_with(b"<!--") {
        return Some(find_sequence(rest, b"-->").map_or(0, |end| end + 3));
    }
    if rest.starts_with(b"<?") {
        return Some(find_sequence(rest, b"?>").map_or(0, |end| end + 2));
    }
    if rest.starts_with(b"<!") {
        return Some(find_byte(rest, b'>').map_or(0, |end| end + 1));
    }
    None
}

fn find_sequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn local_name(raw: &str) -> &str {
    match raw.rfind(':') {
        Some(colon) => &raw[colon + 1..],
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_events(xml: &str) -> Vec<(String, String, String)> {
        let mut parser = XmlPullParser::new(true);
        parser.push(xml.as_bytes());
        let mut events = Vec::new();
        while let Some(event) = parser.next_event() {
            events.push((event.name.to_string(), event.path, event.text));
        }
        events
    }

    #[test]
    fn test_start_and_text_events() {
        let events = collect_events("<root><device><UDN>uuid:01</UDN></device></root>");
        assert_eq!(
            events,
            vec![
                ("root".into(), "/root".into(), "".into()),
                ("device".into(), "/root/device".into(), "".into()),
                ("UDN".into(), "/root/device/UDN".into(), "".into()),
                ("UDN".into(), "/root/device/UDN".into(), "uuid:01".into()),
            ]
        );
    }

    #[test]
    fn test_self_closing_pops_before_return() {
        let events = collect_events("<a><b/><c>x</c></a>");
        assert_eq!(
            events,
            vec![
                ("a".into(), "/a".into(), "".into()),
                ("b".into(), "/a/b".into(), "".into()),
                ("c".into(), "/a/c".into(), "".into()),
                ("c".into(), "/a/c".into(), "x".into()),
            ]
        );
    }

    #[test]
    fn test_namespace_prefix_stripped() {
        let events = collect_events(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body/></s:Envelope>"#,
        );
        assert_eq!(events[0].0, "Envelope");
        assert_eq!(events[1].1, "/Envelope/Body");
    }

    #[test]
    fn test_comments_and_pi_skipped() {
        let events =
            collect_events("<?xml version=\"1.0\"?><!-- hop --><root><x>1</x></root>");
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].2, "1");
    }

    #[test]
    fn test_attributes_captured() {
        let mut parser = XmlPullParser::new(true);
        parser.push(br#"<Event><InstanceID val="0">t</InstanceID></Event>"#);
        let _event_tag = parser.next_event().unwrap();
        let start = parser.next_event().unwrap();
        assert_eq!(start.attributes, r#"val="0""#);
        let text = parser.next_event().unwrap();
        assert_eq!(text.text, "t");
        assert_eq!(text.attributes, r#"val="0""#);
    }

    #[test]
    fn test_incremental_feed() {
        let mut parser = XmlPullParser::new(true);
        parser.push(b"<root><na");
        let first = parser.next_event().unwrap();
        assert_eq!(&*first.name, "root");
        // Le tag incomplet reste en attente.
        assert!(parser.next_event().is_none());
        parser.push(b"me>value</name></root>");
        let start = parser.next_event().unwrap();
        assert_eq!(&*start.name, "name");
        let text = parser.next_event().unwrap();
        assert_eq!(text.text, "value");
        assert!(parser.next_event().is_none());
    }

    #[test]
    fn test_entity_decoding() {
        let events = collect_events("<a>x &amp; y &lt;z&gt;</a>");
        assert_eq!(events[1].2, "x & y <z>");
    }

    #[test]
    fn test_entities_kept_raw_when_disabled() {
        let mut parser = XmlPullParser::new(false);
        parser.push(b"<Result>&lt;DIDL-Lite&gt;</Result>");
        let _start = parser.next_event().unwrap();
        let text = parser.next_event().unwrap();
        assert_eq!(text.text, "&lt;DIDL-Lite&gt;");
    }

    #[test]
    fn test_stream_compacts_after_event() {
        let mut stream = XmlStream::new(true);
        stream.write(b"<root><a>1</a>");
        let mut seen = 0;
        while stream.next_event().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 3);
        stream.write(b"<b>2</b></root>");
        let start = stream.next_event().unwrap();
        assert_eq!(start.path, "/root/b");
    }

    #[test]
    fn test_escape_round_trip() {
        use crate::xml::{EscapingSink, XmlSink};

        let original = r#"a<b>&"c' plus du texte accentué"#;
        let mut escaped = Vec::new();
        EscapingSink::new(&mut escaped)
            .put(original.as_bytes())
            .unwrap();
        let escaped = String::from_utf8(escaped).unwrap();
        assert_eq!(decode_text(&escaped), original);
    }

    #[test]
    fn test_writer_parser_round_trip() {
        use crate::xml::{XmlOut, XmlSink};

        let mut buf: Vec<u8> = Vec::new();
        {
            let mut out = XmlOut::new(&mut buf as &mut dyn XmlSink);
            out.preamble().unwrap();
            out.element_with("root", None, |inner| {
                let mut n = inner.text_element("first", "one & two")?;
                n += inner.text_element("second", "a<b")?;
                Ok(n)
            })
            .unwrap();
        }

        let mut parser = XmlPullParser::new(true);
        parser.push(&buf);
        let mut leaves = Vec::new();
        while let Some(event) = parser.next_event() {
            if !event.text.is_empty() {
                leaves.push((event.name.to_string(), event.text));
            }
        }
        assert_eq!(
            leaves,
            vec![
                ("first".to_string(), "one & two".to_string()),
                ("second".to_string(), "a<b".to_string()),
            ]
        );
    }
}
