//! Écrivain XML en streaming.

use std::io;

use super::sink::{EscapingSink, XmlSink};

/// Écrivain XML streaming.
///
/// Chaque opération écrit directement dans le puits et retourne le nombre
/// d'octets produits. L'idiome d'emploi est d'écrire une première fois dans
/// un [`super::NullSink`] pour connaître la taille exacte, puis une seconde
/// fois dans le puits réseau.
///
/// Les fragments d'attributs passés à `open_with` sont émis tels quels :
/// l'appelant fournit des attributs déjà échappés.
pub struct XmlOut<'a> {
    sink: &'a mut dyn XmlSink,
}

impl<'a> XmlOut<'a> {
    pub fn new(sink: &'a mut dyn XmlSink) -> Self {
        Self { sink }
    }

    /// Émet le préambule XML standard.
    pub fn preamble(&mut self) -> io::Result<usize> {
        self.sink.put(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>")
    }

    /// Ouvre un élément.
    pub fn open(&mut self, name: &str) -> io::Result<usize> {
        self.open_ns(None, name, None)
    }

    /// Ouvre un élément avec un fragment d'attributs pré-échappé.
    pub fn open_with(&mut self, name: &str, attributes: &str) -> io::Result<usize> {
        self.open_ns(None, name, Some(attributes))
    }

    /// Ouvre un élément avec préfixe de namespace optionnel.
    pub fn open_ns(
        &mut self,
        prefix: Option<&str>,
        name: &str,
        attributes: Option<&str>,
    ) -> io::Result<usize> {
        let mut produced = self.sink.put(b"<")?;
        if let Some(prefix) = prefix {
            produced += self.sink.put(prefix.as_bytes())?;
            produced += self.sink.put(b":")?;
        }
        produced += self.sink.put(name.as_bytes())?;
        if let Some(attributes) = attributes {
            if !attributes.is_empty() {
                produced += self.sink.put(b" ")?;
                produced += self.sink.put(attributes.as_bytes())?;
            }
        }
        produced += self.sink.put(b">")?;
        Ok(produced)
    }

    /// Ferme un élément.
    pub fn close(&mut self, name: &str) -> io::Result<usize> {
        self.close_ns(None, name)
    }

    /// Ferme un élément avec préfixe de namespace optionnel.
    pub fn close_ns(&mut self, prefix: Option<&str>, name: &str) -> io::Result<usize> {
        let mut produced = self.sink.put(b"</")?;
        if let Some(prefix) = prefix {
            produced += self.sink.put(prefix.as_bytes())?;
            produced += self.sink.put(b":")?;
        }
        produced += self.sink.put(name.as_bytes())?;
        produced += self.sink.put(b">")?;
        Ok(produced)
    }

    /// Émet un élément auto-fermant.
    pub fn empty(&mut self, name: &str) -> io::Result<usize> {
        let mut produced = self.sink.put(b"<")?;
        produced += self.sink.put(name.as_bytes())?;
        produced += self.sink.put(b"/>")?;
        Ok(produced)
    }

    /// Émet un élément feuille enveloppant du texte.
    ///
    /// Le texte est échappé. Un contenu vide produit un élément
    /// auto-fermant.
    pub fn text_element(&mut self, name: &str, text: &str) -> io::Result<usize> {
        if text.is_empty() {
            return self.empty(name);
        }
        let mut produced = self.open(name)?;
        produced += self.text(text)?;
        produced += self.close(name)?;
        Ok(produced)
    }

    /// Émet un élément feuille enveloppant un entier.
    pub fn int_element(&mut self, name: &str, value: i64) -> io::Result<usize> {
        let mut produced = self.open(name)?;
        produced += self.sink.put(value.to_string().as_bytes())?;
        produced += self.close(name)?;
        Ok(produced)
    }

    /// Émet du texte échappé.
    pub fn text(&mut self, text: &str) -> io::Result<usize> {
        let mut escaped = EscapingSink::new(self.sink);
        escaped.put(text.as_bytes())
    }

    /// Émet un fragment brut, sans échappement.
    pub fn raw(&mut self, fragment: &str) -> io::Result<usize> {
        self.sink.put(fragment.as_bytes())
    }

    /// Émet un élément dont le corps est produit par une closure.
    ///
    /// La closure reçoit le même puits via un nouvel écrivain et retourne
    /// le nombre d'octets qu'elle a produits.
    pub fn element_with<F>(
        &mut self,
        name: &str,
        attributes: Option<&str>,
        body: F,
    ) -> io::Result<usize>
    where
        F: FnOnce(&mut XmlOut<'_>) -> io::Result<usize>,
    {
        let mut produced = self.open_ns(None, name, attributes)?;
        produced += body(&mut XmlOut::new(self.sink))?;
        produced += self.close(name)?;
        Ok(produced)
    }

    /// Accès direct au puits sous-jacent.
    pub fn sink(&mut self) -> &mut dyn XmlSink {
        &mut *self.sink
    }
}
