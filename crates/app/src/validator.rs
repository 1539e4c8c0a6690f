// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Request payload validation
//!
//! Payload types implement [`Validate`] by running field rules against a [`Checks`]
//! collector. Each failed rule is reported as a [`FieldViolation`] naming the field and
//! the rule tag, so clients get one entry per broken constraint.

use serde::{Deserialize, Serialize};

/// One failed field rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// Lower-cased field name
    pub field: String,
    /// Human-readable description
    pub message: String,
}

impl FieldViolation {
    /// Violation of rule `tag` on `field`
    pub fn new(field: &str, tag: &str) -> Self {
        let field = field.to_lowercase();
        let message = format!("field validation for '{field}' failed on the '{tag}' tag");
        Self { field, message }
    }
}

/// Field rules for a payload type
pub trait Validate {
    /// Run every rule, recording failures in `checks`
    fn validate(&self, checks: &mut Checks);
}

/// Collects rule failures for one payload
#[derive(Debug, Default)]
pub struct Checks {
    violations: Vec<FieldViolation>,
}

impl Checks {
    /// Record a violation of `tag` on `field` unless `ok` holds
    pub fn check(&mut self, field: &str, tag: &str, ok: bool) -> &mut Self {
        if !ok {
            self.violations.push(FieldViolation::new(field, tag));
        }
        self
    }

    /// Value must be present and not blank
    pub fn required(&mut self, field: &str, value: &str) -> &mut Self {
        self.check(field, "required", !value.trim().is_empty())
    }

    /// Value must have at least `min` characters
    pub fn min_len(&mut self, field: &str, value: &str, min: usize) -> &mut Self {
        self.check(field, "min", value.chars().count() >= min)
    }

    /// Value must have at most `max` characters
    pub fn max_len(&mut self, field: &str, value: &str, max: usize) -> &mut Self {
        self.check(field, "max", value.chars().count() <= max)
    }

    /// Value must look like `local@domain.tld`
    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        let ok = value.split_once('@').is_some_and(|(local, domain)| {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        });
        self.check(field, "email", ok)
    }

    /// Number must lie within `min..=max`
    pub fn range<N: PartialOrd>(&mut self, field: &str, value: N, min: N, max: N) -> &mut Self {
        self.check(field, "min", value >= min);
        self.check(field, "max", value <= max)
    }
}

/// Validator capability shared by request extractors
#[derive(Debug, Default, Clone, Copy)]
pub struct Validator;

impl Validator {
    /// Create a validator
    pub fn new() -> Self {
        Self
    }

    /// Run the payload's rules
    ///
    /// # Errors
    ///
    /// Returns every violation found, in rule order
    pub fn validate<T: Validate + ?Sized>(&self, value: &T) -> Result<(), Vec<FieldViolation>> {
        let mut checks = Checks::default();
        value.validate(&mut checks);

        if checks.violations.is_empty() {
            Ok(())
        } else {
            Err(checks.violations)
        }
    }
}
