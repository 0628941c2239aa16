//! Puits d'octets pour la génération XML.

use std::io::{self, Write};

/// Puits d'octets.
///
/// `put` retourne le nombre d'octets réellement produits, qui peut dépasser
/// la taille de l'entrée pour un puits qui réécrit son flux (voir
/// [`EscapingSink`]).
pub trait XmlSink {
    fn put(&mut self, bytes: &[u8]) -> io::Result<usize>;
}

impl XmlSink for Vec<u8> {
    fn put(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.extend_from_slice(bytes);
        Ok(bytes.len())
    }
}

/// Puits qui compte sans stocker.
///
/// Sert à dimensionner un document avant de l'écrire pour de vrai.
#[derive(Debug, Default)]
pub struct NullSink;

impl XmlSink for NullSink {
    fn put(&mut self, bytes: &[u8]) -> io::Result<usize> {
        Ok(bytes.len())
    }
}

/// Adapte un `std::io::Write` en puits XML.
pub struct IoSink<W: Write> {
    inner: W,
}

impl<W: Write> IoSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> XmlSink for IoSink<W> {
    fn put(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.inner.write_all(bytes)?;
        Ok(bytes.len())
    }
}

/// Adaptateur d'échappement XML.
///
/// Réécrit `&`, `<`, `>`, `"` et `'` vers leurs entités nommées et
/// transmet le reste inchangé. Le nombre d'octets retourné est la taille
/// après expansion, si bien qu'un appelant qui dimensionne un
/// Content-Length voit la taille réellement émise.
pub struct EscapingSink<'a> {
    inner: &'a mut dyn XmlSink,
}

impl<'a> EscapingSink<'a> {
    pub fn new(inner: &'a mut dyn XmlSink) -> Self {
        Self { inner }
    }

    fn entity(byte: u8) -> Option<&'static [u8]> {
        match byte {
            b'&' => Some(b"&amp;"),
            b'<' => Some(b"&lt;"),
            b'>' => Some(b"&gt;"),
            b'"' => Some(b"&quot;"),
            b'\'' => Some(b"&apos;"),
            _ => None,
        }
    }
}

impl XmlSink for EscapingSink<'_> {
    fn put(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let mut produced = 0;
        let mut plain_start = 0;
        for (index, byte) in bytes.iter().enumerate() {
            if let Some(entity) = Self::entity(*byte) {
                if plain_start < index {
                    produced += self.inner.put(&bytes[plain_start..index])?;
                }
                produced += self.inner.put(entity)?;
                plain_start = index + 1;
            }
        }
        if plain_start < bytes.len() {
            produced += self.inner.put(&bytes[plain_start..])?;
        }
        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sink_counts() {
        let mut sink = NullSink;
        assert_eq!(sink.put(b"hello").unwrap(), 5);
    }

    #[test]
    fn test_escaping_expands() {
        let mut out = Vec::new();
        let mut escaped = EscapingSink::new(&mut out);
        let produced = escaped.put(b"a<b>&\"c'").unwrap();
        assert_eq!(out, b"a&lt;b&gt;&amp;&quot;c&apos;");
        assert_eq!(produced, out.len());
    }

    #[test]
    fn test_escaping_passthrough() {
        let mut out = Vec::new();
        let mut escaped = EscapingSink::new(&mut out);
        let produced = escaped.put("héllo".as_bytes()).unwrap();
        assert_eq!(out, "héllo".as_bytes());
        assert_eq!(produced, out.len());
    }
}
