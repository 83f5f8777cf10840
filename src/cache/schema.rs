//! Collections known to the cache and the fields they can be searched by.

pub const WORK_PACKAGES: &str = "workPackages";
pub const WORKLOGS: &str = "worklogs";
pub const PROJECTS: &str = "projects";

/// A cached collection and its searchable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSchema {
  pub name: &'static str,
  pub indexes: &'static [&'static str],
}

impl CollectionSchema {
  pub fn has_index(&self, index: &str) -> bool {
    self.indexes.contains(&index)
  }
}

pub const COLLECTIONS: &[CollectionSchema] = &[
  CollectionSchema {
    name: WORK_PACKAGES,
    indexes: &["updatedAt", "subject"],
  },
  CollectionSchema {
    name: WORKLOGS,
    indexes: &["spentOn", "workPackageId"],
  },
  CollectionSchema {
    name: PROJECTS,
    indexes: &[],
  },
];

/// Look up a known collection by name.
pub fn find(name: &str) -> Option<&'static CollectionSchema> {
  COLLECTIONS.iter().find(|c| c.name == name)
}

/// Key of the metadata record that tracks a collection's last write.
pub fn metadata_key(collection: &str) -> String {
  format!("{}_lastUpdate", collection)
}
