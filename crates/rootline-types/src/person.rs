//! Persons, their biographical details, and partial updates.
//!
//! A [`Person`] is split in two: [`PersonDetails`] holds the scalar fields
//! that UPDATE_PROP touches and that snapshot rows carry, while the three
//! relationship sets live on `Person` itself and are only ever changed by
//! structural operations.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::EnumString;
use thiserror::Error;

use crate::date::PartialDate;
use crate::ids::PersonId;

/// Recorded gender of a person.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Gender {
    #[strum(serialize = "male", serialize = "m")]
    Male,
    #[strum(serialize = "female", serialize = "f")]
    Female,
    #[default]
    Unknown,
}

impl Gender {
    /// Parse from string (case-insensitive). Supports "m"/"f".
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scalar biographical fields.
///
/// Dates are stored as text: parseable dates are canonicalized by
/// [`normalize`](Self::normalize), anything else ("abt. 1850") is kept
/// verbatim so user input is never lost.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonDetails {
    #[serde(default)]
    pub gender: Gender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_place: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub death_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub death_place: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
}

/// Cross-field validation failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DetailsError {
    #[error("death date {death} is before birth date {birth}")]
    DeathBeforeBirth { birth: String, death: String },
}

impl PersonDetails {
    /// Details with only a gender set.
    pub fn with_gender(gender: Gender) -> Self {
        Self { gender, ..Self::default() }
    }

    /// Trim text, drop empty fields, canonicalize parseable dates.
    pub fn normalize(&mut self) {
        for field in self.text_fields_mut() {
            normalize_text(field);
        }
        for date in [&mut self.birth_date, &mut self.death_date] {
            if let Some(raw) = date.as_deref()
                && let Ok(parsed) = raw.parse::<PartialDate>()
            {
                *date = Some(parsed.to_string());
            }
        }
    }

    /// Check cross-field invariants on normalized details.
    pub fn validate(&self) -> Result<(), DetailsError> {
        if let (Some(birth), Some(death)) = (self.birth(), self.death())
            && death.precedes(&birth)
        {
            return Err(DetailsError::DeathBeforeBirth {
                birth: birth.to_string(),
                death: death.to_string(),
            });
        }
        Ok(())
    }

    /// Parsed birth date, if present and well-formed.
    pub fn birth(&self) -> Option<PartialDate> {
        self.birth_date.as_deref()?.parse().ok()
    }

    /// Parsed death date, if present and well-formed.
    pub fn death(&self) -> Option<PartialDate> {
        self.death_date.as_deref()?.parse().ok()
    }

    /// "First Last", or whichever part is known.
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if parts.is_empty() { None } else { Some(parts.join(" ")) }
    }

    fn text_fields_mut(&mut self) -> [&mut Option<String>; 9] {
        [
            &mut self.first_name,
            &mut self.last_name,
            &mut self.birth_name,
            &mut self.birth_date,
            &mut self.birth_place,
            &mut self.death_date,
            &mut self.death_place,
            &mut self.notes,
            &mut self.photo,
        ]
    }
}

fn normalize_text(field: &mut Option<String>) {
    if let Some(value) = field.take() {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            *field = Some(trimmed.to_string());
        }
    }
}

/// A person in the family graph.
///
/// Relationship sets are kept symmetric by the graph: if B is in A's
/// `parents`, A is in B's `children`; spouse links are mutual.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    #[serde(flatten)]
    pub details: PersonDetails,
    #[serde(default)]
    pub parents: BTreeSet<PersonId>,
    #[serde(default)]
    pub children: BTreeSet<PersonId>,
    #[serde(default)]
    pub spouses: BTreeSet<PersonId>,
}

impl Person {
    /// A person with the given details and no relationships.
    pub fn new(id: PersonId, details: PersonDetails) -> Self {
        Self {
            id,
            details,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            spouses: BTreeSet::new(),
        }
    }

    /// Display name, or the short id when the person is unnamed.
    pub fn label(&self) -> String {
        self.details.display_name().unwrap_or_else(|| self.id.short())
    }

    /// True when the person has no relationships at all.
    pub fn is_isolated(&self) -> bool {
        self.parents.is_empty() && self.children.is_empty() && self.spouses.is_empty()
    }
}

// ============================================================================
// Partial updates
// ============================================================================

/// Update to a single optional text field.
///
/// On the wire a set value is the string itself and a clear is `null`; a
/// field that is absent from the patch is left untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldUpdate {
    Set(String),
    Clear,
}

impl Serialize for FieldUpdate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldUpdate::Set(value) => serializer.serialize_str(value),
            FieldUpdate::Clear => serializer.serialize_none(),
        }
    }
}

fn field_update<'de, D: Deserializer<'de>>(d: D) -> Result<Option<FieldUpdate>, D::Error> {
    let value = Option::<String>::deserialize(d)?;
    Ok(Some(value.map_or(FieldUpdate::Clear, FieldUpdate::Set)))
}

/// Partial scalar update carried by UPDATE_PROP.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "field_update")]
    pub first_name: Option<FieldUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "field_update")]
    pub last_name: Option<FieldUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "field_update")]
    pub birth_name: Option<FieldUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "field_update")]
    pub birth_date: Option<FieldUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "field_update")]
    pub birth_place: Option<FieldUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "field_update")]
    pub death_date: Option<FieldUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "field_update")]
    pub death_place: Option<FieldUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "field_update")]
    pub notes: Option<FieldUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "field_update")]
    pub photo: Option<FieldUpdate>,
}

macro_rules! patch_text_fields {
    ($m:ident) => {
        $m!(first_name);
        $m!(last_name);
        $m!(birth_name);
        $m!(birth_date);
        $m!(birth_place);
        $m!(death_date);
        $m!(death_place);
        $m!(notes);
        $m!(photo);
    };
}

impl PersonPatch {
    /// A patch that sets one text field. Convenience for tests and callers
    /// editing a single input.
    pub fn set(field: &str, value: impl Into<String>) -> Self {
        let mut patch = Self::default();
        let update = Some(FieldUpdate::Set(value.into()));
        match field {
            "first_name" => patch.first_name = update,
            "last_name" => patch.last_name = update,
            "birth_name" => patch.birth_name = update,
            "birth_date" => patch.birth_date = update,
            "birth_place" => patch.birth_place = update,
            "death_date" => patch.death_date = update,
            "death_place" => patch.death_place = update,
            "notes" => patch.notes = update,
            "photo" => patch.photo = update,
            _ => {}
        }
        patch
    }

    /// True when the patch touches no field.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Names of the fields this patch touches, in declaration order.
    pub fn fields(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.gender.is_some() {
            names.push("gender");
        }
        macro_rules! touched {
            ($f:ident) => {
                if self.$f.is_some() {
                    names.push(stringify!($f));
                }
            };
        }
        patch_text_fields!(touched);
        names
    }

    /// Field-wise last-write-wins merge: fields present in `newer` override.
    pub fn merge(&mut self, newer: PersonPatch) {
        if newer.gender.is_some() {
            self.gender = newer.gender;
        }
        macro_rules! take_newer {
            ($f:ident) => {
                if newer.$f.is_some() {
                    self.$f = newer.$f;
                }
            };
        }
        patch_text_fields!(take_newer);
    }

    /// Apply to `details`. Returns true if anything changed.
    ///
    /// The result is normalized; validation is the caller's decision.
    pub fn apply(&self, details: &mut PersonDetails) -> bool {
        let before = details.clone();
        if let Some(gender) = self.gender {
            details.gender = gender;
        }
        macro_rules! apply_field {
            ($f:ident) => {
                match &self.$f {
                    Some(FieldUpdate::Set(v)) => details.$f = Some(v.clone()),
                    Some(FieldUpdate::Clear) => details.$f = None,
                    None => {}
                }
            };
        }
        patch_text_fields!(apply_field);
        details.normalize();
        *details != before
    }

    /// The patch that turns `before` into `after` (every differing field).
    pub fn between(before: &PersonDetails, after: &PersonDetails) -> Self {
        let mut patch = Self::default();
        if before.gender != after.gender {
            patch.gender = Some(after.gender);
        }
        macro_rules! diff_field {
            ($f:ident) => {
                if before.$f != after.$f {
                    patch.$f = Some(match &after.$f {
                        Some(v) => FieldUpdate::Set(v.clone()),
                        None => FieldUpdate::Clear,
                    });
                }
            };
        }
        patch_text_fields!(diff_field);
        patch
    }

    /// The patch that writes every field of `details` (full-record write).
    pub fn from_details(details: &PersonDetails) -> Self {
        let mut patch = Self { gender: Some(details.gender), ..Self::default() };
        macro_rules! full_field {
            ($f:ident) => {
                patch.$f = Some(match &details.$f {
                    Some(v) => FieldUpdate::Set(v.clone()),
                    None => FieldUpdate::Clear,
                });
            };
        }
        patch_text_fields!(full_field);
        patch
    }
}
