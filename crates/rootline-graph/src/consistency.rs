//! Advisory data-quality audit of a family graph.
//!
//! [`check`] is a pure function over an immutable graph; the background
//! worker in [`checker`](crate::checker) runs it off the editing thread.
//! Nothing here blocks or reverts an edit.

use std::collections::BTreeMap;

use rootline_types::{PartialDate, Person, PersonId};
use serde::{Deserialize, Serialize};

use crate::graph::FamilyGraph;

/// How much attention an issue deserves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Shown, but does not count against the health score.
    Info,
    Warning,
    Error,
}

/// Issue families that can be toggled independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueClass {
    Disconnected,
    Dates,
    MissingData,
}

/// Which date field an issue is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateField {
    BirthDate,
    DeathDate,
}

/// One finding about one person.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Issue {
    /// No parents, children or spouses.
    Disconnected,
    BirthAfterDeath { birth: PartialDate, death: PartialDate },
    /// Attached to the parent. `age` is negative when the parent was born
    /// after the child.
    ParentTooYoung { child: PersonId, age: i32 },
    FutureDate { field: DateField, date: PartialDate },
    MissingName,
    MissingBirthDate,
    MissingPhoto,
}

impl Issue {
    pub fn class(&self) -> IssueClass {
        match self {
            Issue::Disconnected => IssueClass::Disconnected,
            Issue::BirthAfterDeath { .. } | Issue::ParentTooYoung { .. } | Issue::FutureDate { .. } => {
                IssueClass::Dates
            }
            Issue::MissingName | Issue::MissingBirthDate | Issue::MissingPhoto => IssueClass::MissingData,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Issue::BirthAfterDeath { .. } | Issue::ParentTooYoung { .. } | Issue::FutureDate { .. } => {
                Severity::Error
            }
            Issue::Disconnected | Issue::MissingName | Issue::MissingBirthDate => Severity::Warning,
            Issue::MissingPhoto => Severity::Info,
        }
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Issue::Disconnected => write!(f, "not connected to anyone"),
            Issue::BirthAfterDeath { birth, death } => write!(f, "born {birth}, after death {death}"),
            Issue::ParentTooYoung { child, age } => write!(f, "parent aged {age} at birth of {}", child.short()),
            Issue::FutureDate { field: DateField::BirthDate, date } => write!(f, "birth date {date} is in the future"),
            Issue::FutureDate { field: DateField::DeathDate, date } => write!(f, "death date {date} is in the future"),
            Issue::MissingName => write!(f, "no name"),
            Issue::MissingBirthDate => write!(f, "no birth date"),
            Issue::MissingPhoto => write!(f, "no photo"),
        }
    }
}

/// Checker configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckPolicy {
    /// Minimum plausible parent age at a child's birth, in whole years.
    pub min_parent_age: i32,
    pub disconnected: bool,
    pub dates: bool,
    pub missing_data: bool,
}

impl Default for CheckPolicy {
    fn default() -> Self {
        Self {
            min_parent_age: 13,
            disconnected: true,
            dates: true,
            missing_data: true,
        }
    }
}

impl CheckPolicy {
    pub fn enabled(&self, class: IssueClass) -> bool {
        match class {
            IssueClass::Disconnected => self.disconnected,
            IssueClass::Dates => self.dates,
            IssueClass::MissingData => self.missing_data,
        }
    }
}

/// Result of one audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueReport {
    /// Only persons with at least one issue appear.
    pub issues: BTreeMap<PersonId, Vec<Issue>>,
    pub total: usize,
    /// Persons with at least one issue above [`Severity::Info`].
    pub flagged: usize,
    /// 0..=100.
    pub health: u8,
}

impl Default for IssueReport {
    fn default() -> Self {
        Self { issues: BTreeMap::new(), total: 0, flagged: 0, health: 100 }
    }
}

impl IssueReport {
    pub fn for_person(&self, id: PersonId) -> &[Issue] {
        self.issues.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every issue of one class, with the person it is attached to.
    pub fn of_class(&self, class: IssueClass) -> impl Iterator<Item = (PersonId, &Issue)> {
        self.issues
            .iter()
            .flat_map(|(id, issues)| issues.iter().map(move |issue| (*id, issue)))
            .filter(move |(_, issue)| issue.class() == class)
    }

    pub fn is_clean(&self) -> bool {
        self.flagged == 0
    }
}

/// `max(0, round(100 × (total − flagged) / total))`; 100 for an empty tree.
pub fn health_score(total: usize, flagged: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let healthy = total.saturating_sub(flagged) as f64;
    (100.0 * healthy / total as f64).round().clamp(0.0, 100.0) as u8
}

/// Audit `graph` as of `today`.
pub fn check(graph: &FamilyGraph, policy: &CheckPolicy, today: PartialDate) -> IssueReport {
    let mut issues: BTreeMap<PersonId, Vec<Issue>> = BTreeMap::new();
    let mut push = |id: PersonId, issue: Issue| {
        if policy.enabled(issue.class()) {
            issues.entry(id).or_default().push(issue);
        }
    };

    for person in graph.people() {
        if person.is_isolated() {
            push(person.id, Issue::Disconnected);
        }

        let birth = person.details.birth();
        let death = person.details.death();
        if let (Some(b), Some(d)) = (birth, death)
            && d.precedes(&b)
        {
            push(person.id, Issue::BirthAfterDeath { birth: b, death: d });
        }
        for (field, date) in [(DateField::BirthDate, birth), (DateField::DeathDate, death)] {
            if let Some(date) = date
                && today.precedes(&date)
            {
                push(person.id, Issue::FutureDate { field, date });
            }
        }
        if let Some(child_birth) = birth {
            for parent in person.parents.iter().filter_map(|id| graph.get(*id)) {
                if let Some(issue) = parent_age_issue(parent, person.id, child_birth, policy.min_parent_age) {
                    push(parent.id, issue);
                }
            }
        }

        if person.details.display_name().is_none() {
            push(person.id, Issue::MissingName);
        }
        if person.details.birth_date.is_none() {
            push(person.id, Issue::MissingBirthDate);
        }
        if person.details.photo.is_none() {
            push(person.id, Issue::MissingPhoto);
        }
    }

    let flagged = issues
        .values()
        .filter(|list| list.iter().any(|i| i.severity() > Severity::Info))
        .count();
    let total = graph.len();
    IssueReport { issues, total, flagged, health: health_score(total, flagged) }
}

fn parent_age_issue(parent: &Person, child: PersonId, child_birth: PartialDate, min_age: i32) -> Option<Issue> {
    let parent_birth = parent.details.birth()?;
    let age = PartialDate::years_between(&parent_birth, &child_birth);
    (age < min_age).then_some(Issue::ParentTooYoung { child, age })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootline_types::{Gender, PersonDetails, PersonPatch, RelationKind};

    fn today() -> PartialDate {
        PartialDate::ymd(2024, 6, 1).unwrap()
    }

    fn complete(first: &str) -> PersonDetails {
        PersonDetails {
            gender: Gender::Female,
            first_name: Some(first.into()),
            birth_date: Some("1900-01-01".into()),
            photo: Some("photo.jpg".into()),
            ..Default::default()
        }
    }

    fn add(graph: &mut FamilyGraph, details: PersonDetails) -> PersonId {
        let id = PersonId::new();
        graph.insert_person(id, details);
        id
    }

    #[test]
    fn test_birth_after_death() {
        let mut graph = FamilyGraph::new();
        let id = add(&mut graph, PersonDetails {
            birth_date: Some("2020-01-01".into()),
            death_date: Some("2019-01-01".into()),
            ..complete("Eve")
        });
        let report = check(&graph, &CheckPolicy::default(), today());
        assert_eq!(report.for_person(id), &[Issue::Disconnected, Issue::BirthAfterDeath {
            birth: "2020-01-01".parse().unwrap(),
            death: "2019-01-01".parse().unwrap(),
        }]);
        assert_eq!(report.flagged, 1);
    }

    #[test]
    fn test_isolated_person_is_disconnected() {
        let mut graph = FamilyGraph::new();
        let a = add(&mut graph, complete("A"));
        let b = add(&mut graph, complete("B"));
        let c = add(&mut graph, complete("C"));
        graph.link(a, b, RelationKind::Spouse);

        let report = check(&graph, &CheckPolicy::default(), today());
        assert_eq!(report.for_person(c), &[Issue::Disconnected]);
        assert!(report.for_person(a).is_empty());
        assert_eq!(report.of_class(IssueClass::Disconnected).count(), 1);
    }

    #[test]
    fn test_parent_too_young_attached_to_parent() {
        let mut graph = FamilyGraph::new();
        let parent = add(&mut graph, PersonDetails { birth_date: Some("1900-06-15".into()), ..complete("P") });
        let child = add(&mut graph, PersonDetails { birth_date: Some("1912-06-15".into()), ..complete("C") });
        let late = add(&mut graph, PersonDetails { birth_date: Some("1890".into()), ..complete("L") });
        graph.link(child, parent, RelationKind::Parent);
        graph.link(parent, late, RelationKind::Child);

        let report = check(&graph, &CheckPolicy::default(), today());
        let found = report.for_person(parent);
        assert!(found.contains(&Issue::ParentTooYoung { child, age: 12 }));
        assert!(found.iter().any(|i| matches!(i, Issue::ParentTooYoung { child: c, age } if *c == late && *age < 0)));
        assert!(report.for_person(child).is_empty());

        let lenient = CheckPolicy { min_parent_age: 10, ..Default::default() };
        let report = check(&graph, &lenient, today());
        assert_eq!(report.for_person(parent).len(), 1);
    }

    #[test]
    fn test_future_dates() {
        let mut graph = FamilyGraph::new();
        let id = add(&mut graph, PersonDetails { birth_date: Some("2030".into()), ..complete("F") });
        let this_year = add(&mut graph, PersonDetails { birth_date: Some("2024".into()), ..complete("T") });
        graph.link(id, this_year, RelationKind::Spouse);
        let report = check(&graph, &CheckPolicy::default(), today());
        assert!(matches!(
            report.for_person(id),
            [Issue::FutureDate { field: DateField::BirthDate, .. }]
        ));
        assert!(report.for_person(this_year).is_empty());
    }

    #[test]
    fn test_missing_data_and_info_severity() {
        let mut graph = FamilyGraph::new();
        let id = add(&mut graph, PersonDetails::default());
        let report = check(&graph, &CheckPolicy::default(), today());
        assert_eq!(
            report.for_person(id),
            &[Issue::MissingName, Issue::MissingBirthDate, Issue::MissingPhoto]
        );

        let mut only_photo = FamilyGraph::new();
        add(&mut only_photo, PersonDetails { photo: None, ..complete("NoPhoto") });
        let report = check(&only_photo, &CheckPolicy::default(), today());
        assert_eq!(report.flagged, 0);
        assert_eq!(report.health, 100);
    }

    #[test]
    fn test_classes_can_be_disabled() {
        let mut graph = FamilyGraph::new();
        add(&mut graph, PersonDetails::default());
        add(&mut graph, PersonDetails::default());
        let policy = CheckPolicy { missing_data: false, disconnected: false, ..Default::default() };
        let report = check(&graph, &policy, today());
        assert!(report.issues.is_empty());
        assert!(report.is_clean());
    }

    #[test]
    fn test_health_score() {
        assert_eq!(health_score(0, 0), 100);
        assert_eq!(health_score(10, 1), 90);
        assert_eq!(health_score(3, 1), 67);
        assert_eq!(health_score(3, 3), 0);
        assert_eq!(health_score(2, 5), 0);
    }

    #[test]
    fn test_ten_person_tree_with_one_flagged() {
        let mut graph = FamilyGraph::new();
        let root = add(&mut graph, complete("Root"));
        let mut last = root;
        for i in 0..9 {
            let id = add(&mut graph, complete(&format!("P{i}")));
            graph.link(last, id, RelationKind::Spouse);
            last = id;
        }
        graph.merge_patch(last, &PersonPatch::set("death_date", "1800")).unwrap();

        let report = check(&graph, &CheckPolicy::default(), today());
        assert_eq!(report.total, 10);
        assert_eq!(report.flagged, 1);
        assert_eq!(report.health, 90);
    }
}
