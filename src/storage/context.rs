//! Registry of context ids and the typed handles operations accept.
//!
//! Every row carries a `ctx` column. A context is declared once with the kind
//! of attribute it names; the registry then hands out a handle type specific
//! to that kind, so a property context cannot reach the alias table.
//!
//! A declaration may also name the entity context its rows hang off
//! (`owner`) and, for relationships and trees, the entity context on the
//! other end (`target`). Writes then reject entities of any other kind.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{ContextId, Result, ScalarValue, SedimentError};

/// Storage class accepted by a property context.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueClass {
    /// Integers only.
    Int,
    /// Byte strings only.
    Bytes,
    /// Either representation.
    #[default]
    Any,
}

impl ValueClass {
    /// Returns `true` when `value` may be stored under this class.
    pub fn admits(self, value: &ScalarValue) -> bool {
        matches!(
            (self, value),
            (ValueClass::Any, _)
                | (ValueClass::Int, ScalarValue::Int(_))
                | (ValueClass::Bytes, ScalarValue::Bytes(_))
        )
    }
}

/// Which reverse indexes a name context maintains.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Prefix index only.
    #[default]
    Prefix,
    /// Phonetic index only.
    Phonetic,
    /// Both indexes.
    Both,
}

impl SearchMode {
    /// Returns `true` if prefix rows are written.
    pub fn prefix(self) -> bool {
        matches!(self, SearchMode::Prefix | SearchMode::Both)
    }

    /// Returns `true` if phonetic rows are written.
    pub fn phonetic(self) -> bool {
        matches!(self, SearchMode::Phonetic | SearchMode::Both)
    }
}

/// The logical attribute a context names.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextKind {
    /// Entity records.
    Entity,
    /// Scalar properties.
    Property {
        /// Accepted storage class.
        #[serde(default)]
        class: ValueClass,
    },
    /// Ordered alias lists, resolvable by hash.
    Alias,
    /// Ordered name lists, searchable by prefix and/or sound.
    Name {
        /// Indexes to maintain.
        #[serde(default)]
        search: SearchMode,
        /// Also index alternate phonetic codes.
        #[serde(default)]
        loose: bool,
    },
    /// Directed relationships.
    Relationship,
    /// Parent/child edges.
    Tree,
}

impl ContextKind {
    /// Short label used in errors and reports.
    pub fn label(&self) -> &'static str {
        match self {
            ContextKind::Entity => "entity",
            ContextKind::Property { .. } => "property",
            ContextKind::Alias => "alias",
            ContextKind::Name { .. } => "name",
            ContextKind::Relationship => "relationship",
            ContextKind::Tree => "tree",
        }
    }

    fn has_target(&self) -> bool {
        matches!(self, ContextKind::Relationship | ContextKind::Tree)
    }
}

/// One context declaration.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ContextDef {
    /// Numeric id stored in the `ctx` column.
    pub id: ContextId,
    /// Optional human-readable name.
    #[serde(default)]
    pub name: Option<String>,
    /// Attribute kind.
    #[serde(flatten)]
    pub kind: ContextKind,
    /// Entity context of the rows' `base_id`; `None` admits any entity.
    #[serde(default)]
    pub owner: Option<ContextId>,
    /// Entity context of a relationship's `rel_id` or a tree's child.
    #[serde(default)]
    pub target: Option<ContextId>,
}

impl ContextDef {
    /// Declares `id` with `kind` and no ownership constraints.
    pub fn new(id: impl Into<ContextId>, kind: ContextKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
            owner: None,
            target: None,
        }
    }

    /// Restricts `base_id` to entities of context `owner`.
    pub fn owned_by(mut self, owner: impl Into<ContextId>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Restricts the far end to entities of context `target`.
    pub fn targeting(mut self, target: impl Into<ContextId>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// Handle to an entity context.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct EntityCtx(ContextId);

/// Handle to a property context.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct PropertyCtx {
    id: ContextId,
    class: ValueClass,
    owner: Option<EntityCtx>,
}

/// Handle to an alias context.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct AliasCtx {
    id: ContextId,
    owner: Option<EntityCtx>,
}

/// Handle to a name context.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct NameCtx {
    id: ContextId,
    search: SearchMode,
    loose: bool,
    owner: Option<EntityCtx>,
}

/// Handle to a relationship context.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct RelCtx {
    id: ContextId,
    owner: Option<EntityCtx>,
    target: Option<EntityCtx>,
}

/// Handle to a tree context.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct TreeCtx {
    id: ContextId,
    owner: Option<EntityCtx>,
    target: Option<EntityCtx>,
}

impl EntityCtx {
    /// Raw id.
    pub fn id(self) -> ContextId {
        self.0
    }
}

impl PropertyCtx {
    /// Raw id.
    pub fn id(self) -> ContextId {
        self.id
    }

    /// Accepted storage class.
    pub fn class(self) -> ValueClass {
        self.class
    }

    /// Entity context the property belongs to, if constrained.
    pub fn owner(self) -> Option<EntityCtx> {
        self.owner
    }
}

impl AliasCtx {
    /// Raw id.
    pub fn id(self) -> ContextId {
        self.id
    }

    /// Entity context the alias belongs to, if constrained.
    pub fn owner(self) -> Option<EntityCtx> {
        self.owner
    }
}

impl NameCtx {
    /// Raw id.
    pub fn id(self) -> ContextId {
        self.id
    }

    /// Indexes maintained for this context.
    pub fn search(self) -> SearchMode {
        self.search
    }

    /// Whether alternate phonetic codes are indexed.
    pub fn loose(self) -> bool {
        self.loose
    }

    /// Entity context the name belongs to, if constrained.
    pub fn owner(self) -> Option<EntityCtx> {
        self.owner
    }
}

impl RelCtx {
    /// Raw id.
    pub fn id(self) -> ContextId {
        self.id
    }

    /// Entity context of the source end, if constrained.
    pub fn owner(self) -> Option<EntityCtx> {
        self.owner
    }

    /// Entity context of the target end, if constrained.
    pub fn target(self) -> Option<EntityCtx> {
        self.target
    }
}

impl TreeCtx {
    /// Raw id.
    pub fn id(self) -> ContextId {
        self.id
    }

    /// Entity context of parents, if constrained.
    pub fn owner(self) -> Option<EntityCtx> {
        self.owner
    }

    /// Entity context of children, if constrained.
    pub fn target(self) -> Option<EntityCtx> {
        self.target
    }
}

/// Immutable table of declared contexts.
#[derive(Clone, Debug, Default)]
pub struct ContextRegistry {
    defs: BTreeMap<ContextId, ContextDef>,
}

impl ContextRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a list of declarations.
    ///
    /// Every `owner` and `target` must name an entity context of the same
    /// list.
    pub fn from_defs(defs: impl IntoIterator<Item = ContextDef>) -> Result<Self> {
        let mut registry = Self::new();
        for def in defs {
            registry.insert(def)?;
        }
        registry.check_references()?;
        Ok(registry)
    }

    /// Declares `id` with `kind`.
    pub fn define(self, id: impl Into<ContextId>, kind: ContextKind) -> Result<Self> {
        self.declare(ContextDef::new(id, kind))
    }

    /// Adds a full declaration. Its `owner` and `target` must already be
    /// declared as entity contexts.
    pub fn declare(mut self, def: ContextDef) -> Result<Self> {
        self.check_def(&def)?;
        self.insert(def)?;
        Ok(self)
    }

    fn insert(&mut self, def: ContextDef) -> Result<()> {
        if self.defs.contains_key(&def.id) {
            return Err(SedimentError::Invalid("context id declared twice"));
        }
        if def.kind == ContextKind::Entity && def.owner.is_some() {
            return Err(SedimentError::Invalid("entity contexts have no owner"));
        }
        if def.target.is_some() && !def.kind.has_target() {
            return Err(SedimentError::Invalid(
                "only relationship and tree contexts have a target",
            ));
        }
        self.defs.insert(def.id, def);
        Ok(())
    }

    fn check_def(&self, def: &ContextDef) -> Result<()> {
        for referenced in def.owner.iter().chain(def.target.iter()) {
            self.entity(*referenced)?;
        }
        Ok(())
    }

    fn check_references(&self) -> Result<()> {
        self.defs.values().try_for_each(|def| self.check_def(def))
    }

    fn constraint(&self, id: Option<ContextId>) -> Result<Option<EntityCtx>> {
        id.map(|id| self.entity(id)).transpose()
    }

    /// Returns the declaration of `id`.
    pub fn get(&self, id: ContextId) -> Option<&ContextDef> {
        self.defs.get(&id)
    }

    /// Iterates declarations in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ContextDef> {
        self.defs.values()
    }

    fn def_of(&self, id: ContextId, expected: &'static str) -> Result<&ContextDef> {
        self.defs
            .get(&id)
            .ok_or(SedimentError::BadContext { ctx: id, expected })
    }

    /// Resolves an entity context.
    pub fn entity(&self, id: impl Into<ContextId>) -> Result<EntityCtx> {
        let id = id.into();
        match self.def_of(id, "entity")?.kind {
            ContextKind::Entity => Ok(EntityCtx(id)),
            _ => Err(SedimentError::BadContext {
                ctx: id,
                expected: "entity",
            }),
        }
    }

    /// Resolves a property context.
    pub fn property(&self, id: impl Into<ContextId>) -> Result<PropertyCtx> {
        let id = id.into();
        let def = self.def_of(id, "property")?;
        match def.kind {
            ContextKind::Property { class } => Ok(PropertyCtx {
                id,
                class,
                owner: self.constraint(def.owner)?,
            }),
            _ => Err(SedimentError::BadContext {
                ctx: id,
                expected: "property",
            }),
        }
    }

    /// Resolves an alias context.
    pub fn alias(&self, id: impl Into<ContextId>) -> Result<AliasCtx> {
        let id = id.into();
        let def = self.def_of(id, "alias")?;
        match def.kind {
            ContextKind::Alias => Ok(AliasCtx {
                id,
                owner: self.constraint(def.owner)?,
            }),
            _ => Err(SedimentError::BadContext {
                ctx: id,
                expected: "alias",
            }),
        }
    }

    /// Resolves a name context.
    pub fn name(&self, id: impl Into<ContextId>) -> Result<NameCtx> {
        let id = id.into();
        let def = self.def_of(id, "name")?;
        match def.kind {
            ContextKind::Name { search, loose } => Ok(NameCtx {
                id,
                search,
                loose,
                owner: self.constraint(def.owner)?,
            }),
            _ => Err(SedimentError::BadContext {
                ctx: id,
                expected: "name",
            }),
        }
    }

    /// Resolves a relationship context.
    pub fn relationship(&self, id: impl Into<ContextId>) -> Result<RelCtx> {
        let id = id.into();
        let def = self.def_of(id, "relationship")?;
        match def.kind {
            ContextKind::Relationship => Ok(RelCtx {
                id,
                owner: self.constraint(def.owner)?,
                target: self.constraint(def.target)?,
            }),
            _ => Err(SedimentError::BadContext {
                ctx: id,
                expected: "relationship",
            }),
        }
    }

    /// Resolves a tree context.
    pub fn tree(&self, id: impl Into<ContextId>) -> Result<TreeCtx> {
        let id = id.into();
        let def = self.def_of(id, "tree")?;
        match def.kind {
            ContextKind::Tree => Ok(TreeCtx {
                id,
                owner: self.constraint(def.owner)?,
                target: self.constraint(def.target)?,
            }),
            _ => Err(SedimentError::BadContext {
                ctx: id,
                expected: "tree",
            }),
        }
    }
}
