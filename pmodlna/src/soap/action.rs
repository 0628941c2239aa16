//! Requêtes et réponses d'action.

use crate::devices::ServiceDescription;

/// Requête d'action à destination d'un service.
///
/// Invalide si l'URL de contrôle est vide ou si le nom d'action est vide ;
/// une requête invalide n'est pas envoyée.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub service_type: String,
    pub control_url: String,
    pub action: String,
    pub args: Vec<(String, String)>,

    /// Nombre minimal de résultats attendus, optionnel.
    pub expected_results: Option<usize>,
}

impl ActionRequest {
    pub fn new(service: &ServiceDescription, action: &str) -> Self {
        Self {
            service_type: service.service_type.clone(),
            control_url: service.control_url.clone(),
            action: action.to_string(),
            args: Vec::new(),
            expected_results: None,
        }
    }

    /// Ajoute un argument, dans l'ordre d'appel.
    pub fn arg(mut self, name: &str, value: &str) -> Self {
        self.args.push((name.to_string(), value.to_string()));
        self
    }

    pub fn expect_results(mut self, count: usize) -> Self {
        self.expected_results = Some(count);
        self
    }

    pub fn is_valid(&self) -> bool {
        !self.control_url.is_empty() && !self.action.is_empty()
    }
}

/// Réponse d'action.
#[derive(Debug, Clone, Default)]
pub struct ActionReply {
    pub valid: bool,
    pub args: Vec<(String, String)>,
}

impl ActionReply {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            args: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self {
            valid: true,
            args: Vec::new(),
        }
    }

    /// Ajoute un argument de résultat.
    pub fn with_arg(mut self, name: &str, value: &str) -> Self {
        self.args.push((name.to_string(), value.to_string()));
        self
    }

    /// Valeur du premier argument portant ce nom.
    pub fn argument(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}
