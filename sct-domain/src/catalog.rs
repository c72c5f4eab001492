use crate::Location;
use std::collections::HashMap;

/// Reference data fetched once at startup and used only to canonicalize reported names.
/// Lookups are case-insensitive; on duplicate entries the first one wins.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCatalogs {
    locations: HashMap<String, Location>,
    items: HashMap<String, String>,
}

impl ReferenceCatalogs {
    pub fn new(locations: Vec<Location>, items: Vec<String>) -> Self {
        let mut location_index = HashMap::with_capacity(locations.len());
        for location in locations {
            location_index
                .entry(location.name.to_lowercase())
                .or_insert(location);
        }

        let mut item_index = HashMap::with_capacity(items.len());
        for item in items {
            item_index.entry(item.to_lowercase()).or_insert(item);
        }

        Self {
            locations: location_index,
            items: item_index,
        }
    }

    pub fn num_locations(&self) -> usize {
        self.locations.len()
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> impl Iterator<Item = &String> + '_ {
        self.items.values()
    }

    pub fn canonical_commodity(&self, reported: &str) -> String {
        self.items
            .get(&reported.to_lowercase())
            .cloned()
            .unwrap_or_else(|| reported.to_string())
    }

    pub fn resolve_location(&self, reported: &str) -> Location {
        self.locations
            .get(&reported.to_lowercase())
            .cloned()
            .unwrap_or_else(|| Location::unknown(reported))
    }
}
