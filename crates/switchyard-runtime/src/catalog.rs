//! Known-model sets per provider family.

use std::collections::{BTreeSet, HashMap};

use anyhow::{bail, Result};

use crate::types::Provider;

pub const OPENAI_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4-turbo",
    "gpt-4",
    "gpt-3.5-turbo",
];

pub const ANTHROPIC_MODELS: &[&str] = &[
    "claude-3-5-sonnet-20241022",
    "claude-3-5-haiku-20241022",
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-haiku-20240307",
];

pub const GEMINI_MODELS: &[&str] = &[
    "gemini-2.0-flash",
    "gemini-1.5-pro",
    "gemini-1.5-flash",
    "gemini-1.0-pro",
];

/// Read-only model catalog, built once at startup and shared by reference.
#[derive(Debug, Clone)]
pub struct ProviderCatalog {
    models: HashMap<Provider, BTreeSet<String>>,
}

impl ProviderCatalog {
    /// Build a catalog, rejecting a model id claimed by more than one provider.
    pub fn new(entries: impl IntoIterator<Item = (Provider, Vec<String>)>) -> Result<Self> {
        let mut models: HashMap<Provider, BTreeSet<String>> = HashMap::new();
        for (provider, ids) in entries {
            models.entry(provider).or_default().extend(
                ids.into_iter()
                    .map(|id| id.trim().to_string())
                    .filter(|id| !id.is_empty()),
            );
        }

        let catalog = Self { models };
        catalog.check_disjoint()?;
        Ok(catalog)
    }

    /// Built-in model lists.
    pub fn builtin() -> Self {
        let owned = |ids: &[&str]| ids.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>();
        let mut models = HashMap::new();
        models.insert(Provider::OpenAI, owned(OPENAI_MODELS));
        models.insert(Provider::Anthropic, owned(ANTHROPIC_MODELS));
        models.insert(Provider::Gemini, owned(GEMINI_MODELS));
        Self { models }
    }

    fn check_disjoint(&self) -> Result<()> {
        for (i, a) in Provider::ALL.iter().enumerate() {
            for b in &Provider::ALL[i + 1..] {
                if let Some(shared) = self.models(*a).intersection(self.models(*b)).next() {
                    bail!("model '{}' is claimed by both {} and {}", shared, a, b);
                }
            }
        }
        Ok(())
    }

    pub fn models(&self, provider: Provider) -> &BTreeSet<String> {
        static EMPTY: BTreeSet<String> = BTreeSet::new();
        self.models.get(&provider).unwrap_or(&EMPTY)
    }

    pub fn contains(&self, provider: Provider, model: &str) -> bool {
        self.models(provider).contains(model)
    }

    /// First provider, in priority order, that claims the model.
    pub fn provider_for(&self, model: &str) -> Option<Provider> {
        Provider::ALL
            .into_iter()
            .find(|provider| self.contains(*provider, model))
    }
}
