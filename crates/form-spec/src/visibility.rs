use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use crate::linkage::ParentLink;
use crate::spec::config::{ConfigOverlay, DisplayKind, FormConfig};
use crate::spec::template::{BlockId, FormTemplate, OptionId, StepId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepVisibility {
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockVisibility {
    pub visible: bool,
    /// Visible, in a visible step, and not cut off by a hidden parent.
    pub reachable: bool,
    pub effective_label: String,
    pub label_overridden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_option: Option<OptionId>,
    /// The parent option or one of its ancestors is hidden.
    pub parent_hidden: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OptionVisibility {
    pub visible: bool,
}

/// Overlay entries that do not point at an element of the template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum IntegrityIssue {
    DanglingDisplay { kind: DisplayKind, parent_id: u32 },
    DanglingLabel { parent_id: u32 },
    DanglingParent { block: BlockId, option: OptionId },
    ParentCycle { block: BlockId },
}

/// Pure result of layering an overlay on a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VisibilityMap {
    pub steps: BTreeMap<StepId, StepVisibility>,
    pub blocks: BTreeMap<BlockId, BlockVisibility>,
    pub options: BTreeMap<OptionId, OptionVisibility>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub integrity: Vec<IntegrityIssue>,
}

impl VisibilityMap {
    pub fn block(&self, id: BlockId) -> Option<&BlockVisibility> {
        self.blocks.get(&id)
    }

    pub fn is_step_visible(&self, id: StepId) -> bool {
        self.steps.get(&id).is_some_and(|step| step.visible)
    }

    pub fn is_block_visible(&self, id: BlockId) -> bool {
        self.blocks.get(&id).is_some_and(|block| block.visible)
    }

    pub fn is_block_reachable(&self, id: BlockId) -> bool {
        self.blocks.get(&id).is_some_and(|block| block.reachable)
    }

    pub fn is_option_visible(&self, id: OptionId) -> bool {
        self.options.get(&id).is_some_and(|option| option.visible)
    }

    pub fn effective_label(&self, id: BlockId) -> Option<&str> {
        self.blocks
            .get(&id)
            .map(|block| block.effective_label.as_str())
    }

    pub fn parent_option(&self, id: BlockId) -> Option<OptionId> {
        self.blocks.get(&id).and_then(|block| block.parent_option)
    }

    /// Blocks revealed by the given option.
    pub fn children_of(&self, option: OptionId) -> Vec<BlockId> {
        self.blocks
            .iter()
            .filter(|(_, block)| block.parent_option == Some(option))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn integrity_issues(&self) -> &[IntegrityIssue] {
        &self.integrity
    }
}

/// Computes visibility, effective labels and reachability for every element.
///
/// Dangling overlay entries are reported in `integrity` and otherwise behave
/// as if absent.
pub fn resolve_visibility(
    template: &FormTemplate,
    overlay: &ConfigOverlay,
    linkage: &dyn ParentLink,
) -> VisibilityMap {
    let mut map = VisibilityMap::default();
    let mut option_owner = BTreeMap::new();

    for step in &template.steps {
        map.steps.insert(
            step.id,
            StepVisibility {
                visible: !overlay.is_step_hidden(step.id),
            },
        );
        for block in &step.blocks {
            for option in &block.options {
                option_owner.insert(option.id, block.id);
                map.options.insert(
                    option.id,
                    OptionVisibility {
                        visible: !overlay.is_option_hidden(option.id),
                    },
                );
            }
        }
    }

    let mut parents = BTreeMap::new();
    let mut step_of = BTreeMap::new();
    for step in &template.steps {
        for (index, block) in step.blocks.iter().enumerate() {
            step_of.insert(block.id, step.id);
            let mut parent = linkage.parent_option(template, step, index);
            if let Some(option) = parent
                && option_owner.get(&option).is_none_or(|owner| *owner == block.id)
            {
                tracing::warn!(
                    block = %block.id,
                    option = %option,
                    "conditional block points at an unknown or own option"
                );
                map.integrity
                    .push(IntegrityIssue::DanglingParent { block: block.id, option });
                parent = None;
            }
            parents.insert(block.id, parent);

            let label = overlay.block_label(block.id);
            map.blocks.insert(
                block.id,
                BlockVisibility {
                    visible: !overlay.is_block_hidden(block.id),
                    reachable: false,
                    effective_label: label.unwrap_or(block.own_label()).to_string(),
                    label_overridden: label.is_some(),
                    parent_option: parent,
                    parent_hidden: false,
                },
            );
        }
    }

    let mut walk = ReachabilityWalk {
        map: &map,
        parents: &parents,
        option_owner: &option_owner,
        step_of: &step_of,
        resolved: BTreeMap::new(),
        visiting: BTreeSet::new(),
        cycles: BTreeSet::new(),
    };
    for id in parents.keys() {
        walk.visiting.clear();
        walk.resolve(*id);
    }
    let ReachabilityWalk {
        resolved, cycles, ..
    } = walk;
    for (id, (reachable, parent_hidden)) in resolved {
        if let Some(block) = map.blocks.get_mut(&id) {
            block.reachable = reachable;
            block.parent_hidden = parent_hidden;
        }
    }
    map.integrity.extend(
        cycles
            .into_iter()
            .map(|block| IntegrityIssue::ParentCycle { block }),
    );

    let dangling = dangling_overrides(template, overlay, &map);
    map.integrity.extend(dangling);

    map
}

/// Resolves the visibility of a versioned configuration.
pub fn resolve_config(
    template: &FormTemplate,
    config: &FormConfig,
    linkage: &dyn ParentLink,
) -> VisibilityMap {
    resolve_visibility(template, &config.overlay, linkage)
}

struct ReachabilityWalk<'a> {
    map: &'a VisibilityMap,
    parents: &'a BTreeMap<BlockId, Option<OptionId>>,
    option_owner: &'a BTreeMap<OptionId, BlockId>,
    step_of: &'a BTreeMap<BlockId, StepId>,
    resolved: BTreeMap<BlockId, (bool, bool)>,
    visiting: BTreeSet<BlockId>,
    cycles: BTreeSet<BlockId>,
}

impl ReachabilityWalk<'_> {
    /// Returns `(reachable, parent_hidden)` for a block.
    fn resolve(&mut self, id: BlockId) -> (bool, bool) {
        if let Some(done) = self.resolved.get(&id) {
            return *done;
        }
        let own = self.map.is_block_visible(id)
            && self
                .step_of
                .get(&id)
                .is_some_and(|step| self.map.is_step_visible(*step));

        let parent = self.parents.get(&id).copied().flatten();
        let owner = parent.and_then(|option| self.option_owner.get(&option).copied());
        let (Some(option), Some(owner)) = (parent, owner) else {
            self.resolved.insert(id, (own, false));
            return (own, false);
        };
        if !self.visiting.insert(id) {
            tracing::warn!(block = %id, "conditional blocks reference each other");
            self.cycles.insert(id);
            return (false, false);
        }

        let (owner_reachable, owner_parent_hidden) = self.resolve(owner);
        let option_visible = self.map.is_option_visible(option);
        let result = (
            own && option_visible && owner_reachable,
            !option_visible || owner_parent_hidden,
        );
        self.resolved.insert(id, result);
        result
    }
}

fn dangling_overrides(
    template: &FormTemplate,
    overlay: &ConfigOverlay,
    map: &VisibilityMap,
) -> Vec<IntegrityIssue> {
    let mut issues: Vec<IntegrityIssue> = Vec::new();
    for entry in &overlay.displays {
        let exists = match entry.kind {
            DisplayKind::Step => template
                .steps
                .iter()
                .any(|step| step.id.0 == entry.parent_id),
            DisplayKind::Block => map.blocks.contains_key(&BlockId(entry.parent_id)),
            DisplayKind::BlockOption => map.options.contains_key(&OptionId(entry.parent_id)),
        };
        let issue = IntegrityIssue::DanglingDisplay {
            kind: entry.kind,
            parent_id: entry.parent_id,
        };
        if !exists && !issues.contains(&issue) {
            tracing::warn!(
                kind = entry.kind.as_str(),
                parent_id = entry.parent_id,
                "display override references no template element; ignoring it"
            );
            issues.push(issue);
        }
    }
    for label in &overlay.labels {
        let issue = IntegrityIssue::DanglingLabel {
            parent_id: label.parent_id,
        };
        if !map.blocks.contains_key(&BlockId(label.parent_id)) && !issues.contains(&issue) {
            tracing::warn!(
                parent_id = label.parent_id,
                "label override references no template block; ignoring it"
            );
            issues.push(issue);
        }
    }
    issues
}

/// Template, overlay and their resolved visibility, shared by the collector,
/// the renderers and the persistence layer.
#[derive(Debug, Clone)]
pub struct ResolvedForm {
    template: Arc<FormTemplate>,
    config: Arc<FormConfig>,
    visibility: VisibilityMap,
}

impl ResolvedForm {
    pub fn new(
        template: Arc<FormTemplate>,
        config: Arc<FormConfig>,
        linkage: &dyn ParentLink,
    ) -> Self {
        let visibility = resolve_config(&template, &config, linkage);
        Self {
            template,
            config,
            visibility,
        }
    }

    pub fn template(&self) -> &FormTemplate {
        &self.template
    }

    pub fn template_arc(&self) -> Arc<FormTemplate> {
        Arc::clone(&self.template)
    }

    pub fn config(&self) -> &FormConfig {
        &self.config
    }

    pub fn config_version(&self) -> u32 {
        self.config.version
    }

    pub fn visibility(&self) -> &VisibilityMap {
        &self.visibility
    }

    /// Indices of the steps a respondent goes through.
    pub fn visible_steps(&self) -> Vec<usize> {
        self.template
            .steps
            .iter()
            .enumerate()
            .filter(|(_, step)| self.visibility.is_step_visible(step.id))
            .map(|(index, _)| index)
            .collect()
    }
}
