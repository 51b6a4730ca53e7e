//! Active predicate filters and their conjunction.

use std::{collections::BTreeSet, fmt, sync::Arc};

use geo::{Intersects, Rect};

use crate::model::{Feature, ModelType};

/// Category a predicate is registered under. Drives replacement on insert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterCategory {
    ModelType,
    SpatialZone,
    TemporalZone,
    Process,
    Search,
    Rectangle,
    Generic,
}

impl FilterCategory {
    /// Categories that hold at most one predicate; a new one evicts the old.
    pub fn is_exclusive(self) -> bool {
        matches!(self, FilterCategory::ModelType | FilterCategory::Rectangle)
    }
}

/// Caller-supplied test, compared by name.
#[derive(Clone)]
pub struct NamedPredicate {
    pub name: String,
    test: Arc<dyn Fn(&Feature) -> bool + Send + Sync>,
}

impl NamedPredicate {
    pub fn new(
        name: impl Into<String>,
        test: impl Fn(&Feature) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self { name: name.into(), test: Arc::new(test) }
    }
}

impl PartialEq for NamedPredicate {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl fmt::Debug for NamedPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedPredicate").field("name", &self.name).finish()
    }
}

/// Boolean test over a feature. Evaluation has no side effects.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// Feature's model type is one of the set.
    ModelTypes(BTreeSet<ModelType>),
    /// Feature's spatial zone is one of the set. Absent zones never match.
    SpatialZones(BTreeSet<String>),
    TemporalZones(BTreeSet<String>),
    /// Feature carries the process, matched by identifier or by name.
    Process(String),
    /// Lowercased needle matched against the searchable text.
    Search(String),
    /// Feature location lies inside the rectangle, boundary included.
    Rectangle(Rect<f64>),
    Generic(NamedPredicate),
}

impl Predicate {
    pub fn search(text: &str) -> Self {
        Predicate::Search(text.trim().to_lowercase())
    }

    pub fn matches(&self, feature: &Feature) -> bool {
        match self {
            Predicate::ModelTypes(types) => types.contains(&feature.model_type()),
            Predicate::SpatialZones(zones) => {
                feature.spatial_zone().is_some_and(|z| zones.contains(z))
            }
            Predicate::TemporalZones(zones) => {
                feature.temporal_zone().is_some_and(|z| zones.contains(z))
            }
            Predicate::Process(key) => feature
                .processes
                .iter()
                .any(|p| p.identifier == *key || p.process == *key),
            Predicate::Search(needle) => feature.matches_text(needle),
            Predicate::Rectangle(rect) => rect.intersects(&feature.location.point().0),
            Predicate::Generic(named) => (named.test)(feature),
        }
    }
}

/// A predicate together with the category it was registered under.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub category: FilterCategory,
    pub predicate: Predicate,
}

/// Ordered collection of active filters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterRegistry {
    entries: Vec<Filter>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `predicate`. Exclusive categories first drop any entry of the
    /// same category, so the newest one wins.
    pub fn add_or_replace(&mut self, predicate: Predicate, category: FilterCategory) {
        if category.is_exclusive() {
            self.entries.retain(|f| f.category != category);
        }
        self.entries.push(Filter { category, predicate });
    }

    /// Removes the first entry equal to `predicate`. Returns whether one was found.
    pub fn remove(&mut self, predicate: &Predicate) -> bool {
        match self.entries.iter().position(|f| f.predicate == *predicate) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Drops every entry of `category`, returning how many went.
    pub fn remove_category(&mut self, category: FilterCategory) -> usize {
        let before = self.entries.len();
        self.entries.retain(|f| f.category != category);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Empties the registry but keeps the rectangle filter, if one is set.
    pub fn clear_except_rectangle(&mut self) {
        self.entries.retain(|f| f.category == FilterCategory::Rectangle);
    }

    /// Conjunction of every active predicate; an empty registry admits everything.
    pub fn evaluate(&self, feature: &Feature) -> bool {
        self.entries.iter().all(|f| f.predicate.matches(feature))
    }

    pub fn rectangle(&self) -> Option<Rect<f64>> {
        self.entries.iter().find_map(|f| match f.predicate {
            Predicate::Rectangle(rect) if f.category == FilterCategory::Rectangle => Some(rect),
            _ => None,
        })
    }

    pub fn count(&self, category: FilterCategory) -> usize {
        self.entries.iter().filter(|f| f.category == category).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
