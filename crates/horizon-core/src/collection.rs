//! Name-keyed term collections
//!
//! Cost and constraint terms are registered under unique names and evaluated
//! in insertion order, so summation order is stable across clones.

use std::collections::HashMap;

use crate::error::SolverError;

/// Insertion-ordered collection of named terms.
///
/// Cloning the collection deep-clones every term through `F`, the term
/// type's boxed-clone function (capability objects are trait objects).
pub struct Collection<T: ?Sized> {
    terms: Vec<Box<T>>,
    index_by_name: HashMap<String, usize>,
    clone_term: fn(&T) -> Box<T>,
}

impl<T: ?Sized> Collection<T> {
    /// Empty collection; `clone_term` duplicates one boxed term.
    pub fn new(clone_term: fn(&T) -> Box<T>) -> Self {
        Self {
            terms: Vec::new(),
            index_by_name: HashMap::new(),
            clone_term,
        }
    }

    /// True when the collection holds no terms.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Number of registered terms.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Adds a term under a unique name, taking ownership.
    pub fn add(&mut self, name: impl Into<String>, term: Box<T>) -> Result<(), SolverError> {
        let name = name.into();
        if self.index_by_name.contains_key(&name) {
            return Err(SolverError::DuplicateTerm(name));
        }
        self.index_by_name.insert(name, self.terms.len());
        self.terms.push(term);
        Ok(())
    }

    /// Looks a term up by name.
    pub fn get(&self, name: &str) -> Result<&T, SolverError> {
        self.index_by_name
            .get(name)
            .map(|&i| self.terms[i].as_ref())
            .ok_or_else(|| SolverError::UnknownTerm(name.to_string()))
    }

    /// Iterates terms in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.terms.iter().map(|t| t.as_ref())
    }
}

impl<T: ?Sized> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            terms: self.terms.iter().map(|t| (self.clone_term)(t)).collect(),
            index_by_name: self.index_by_name.clone(),
            clone_term: self.clone_term,
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<(&String, &usize)> = self.index_by_name.iter().collect();
        names.sort_by_key(|(_, &i)| i);
        f.debug_list().entries(names.iter().map(|(n, _)| n)).finish()
    }
}
