//! In-memory inverted index with idf scoring.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{LazyLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use regex::Regex;

use ragdb_core::types::{Meta, ResultType, SearchResult};

use crate::tantivy_utils::STOP_WORDS;

static WORD: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\w+").ok());

/// `\w+` runs, lowercased, stop words and tokens of two chars or fewer removed.
pub fn tokenize(text: &str) -> Vec<String> {
    let Some(word) = WORD.as_ref() else { return Vec::new() };
    word.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|t| t.chars().count() > 2 && !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

struct StoredDoc {
    content: String,
    metadata: Meta,
    seq: u64,
    terms: BTreeSet<String>,
}

#[derive(Default)]
struct Inner {
    postings: HashMap<String, HashSet<String>>,
    docs: HashMap<String, StoredDoc>,
    next_seq: u64,
}

impl Inner {
    fn unlink(&mut self, id: &str, terms: &BTreeSet<String>) {
        for term in terms {
            if let Some(ids) = self.postings.get_mut(term) {
                ids.remove(id);
                if ids.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
    }
}

#[derive(Default)]
pub struct KeywordIndex {
    inner: RwLock<Inner>,
}

impl KeywordIndex {
    pub fn new() -> Self { Self::default() }

    fn read(&self) -> RwLockReadGuard<'_, Inner> { self.inner.read().unwrap_or_else(PoisonError::into_inner) }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> { self.inner.write().unwrap_or_else(PoisonError::into_inner) }

    /// Re-adding an id replaces its postings and keeps its original position
    /// for tie-breaking.
    pub fn add_document(&self, id: &str, content: &str, metadata: Meta) {
        let terms: BTreeSet<String> = tokenize(content).into_iter().collect();
        let mut inner = self.write();
        let seq = match inner.docs.remove(id) {
            Some(old) => {
                inner.unlink(id, &old.terms);
                old.seq
            }
            None => {
                inner.next_seq += 1;
                inner.next_seq
            }
        };
        for term in &terms {
            inner.postings.entry(term.clone()).or_default().insert(id.to_string());
        }
        inner.docs.insert(id.to_string(), StoredDoc { content: content.to_string(), metadata, seq, terms });
    }

    pub fn remove_document(&self, id: &str) -> bool {
        let mut inner = self.write();
        match inner.docs.remove(id) {
            Some(old) => {
                inner.unlink(id, &old.terms);
                true
            }
            None => false,
        }
    }

    /// Sum over distinct matched query terms of `ln(1 + N / df)`; ties go to
    /// the earlier-added document.
    pub fn search_keywords(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        let query_terms: BTreeSet<String> = tokenize(query).into_iter().collect();
        let inner = self.read();
        if query_terms.is_empty() || inner.docs.is_empty() || limit == 0 {
            return Vec::new();
        }

        let n = inner.docs.len() as f32;
        let mut scores: HashMap<&str, f32> = HashMap::new();
        for term in &query_terms {
            let Some(ids) = inner.postings.get(term) else { continue };
            let idf = (1.0 + n / ids.len() as f32).ln();
            for id in ids {
                *scores.entry(id.as_str()).or_insert(0.0) += idf;
            }
        }

        let mut ranked: Vec<(&str, f32, u64)> =
            scores.into_iter().filter_map(|(id, score)| inner.docs.get(id).map(|d| (id, score, d.seq))).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.2.cmp(&b.2)));
        ranked
            .into_iter()
            .take(limit)
            .filter_map(|(id, score, _)| {
                inner.docs.get(id).map(|d| SearchResult {
                    id: id.to_string(),
                    content: d.content.clone(),
                    score,
                    result_type: ResultType::Keyword,
                    metadata: d.metadata.clone(),
                })
            })
            .collect()
    }

    /// Indexed terms of a document, sorted.
    pub fn terms_for(&self, id: &str) -> Option<Vec<String>> {
        self.read().docs.get(id).map(|d| d.terms.iter().cloned().collect())
    }

    pub fn contains(&self, id: &str) -> bool { self.read().docs.contains_key(id) }

    pub fn len(&self) -> usize { self.read().docs.len() }

    pub fn is_empty(&self) -> bool { self.read().docs.is_empty() }

    pub fn term_count(&self) -> usize { self.read().postings.len() }

    pub fn clear(&self) { *self.write() = Inner::default(); }
}
