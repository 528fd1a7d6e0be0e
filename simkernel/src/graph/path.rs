//! Routes between components through the module hierarchy.
use super::{ComponentId, ModuleGraph, ResolutionError};

/// A step of a route through the module hierarchy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Hop {
    /// Leaves `module` upwards, into its parent.
    Ascend(ComponentId),
    /// Moves sideways inside `within`, from one of its children (or itself) to
    /// another.
    Cross {
        /// The common ancestor in whose coordinate space the hop happens.
        within: ComponentId,
        /// Child of `within` on the source side.
        from: ComponentId,
        /// Child of `within` on the destination side.
        to: ComponentId,
    },
    /// Enters `module` from its parent.
    Descend(ComponentId),
}

impl Hop {
    /// Returns the same hop travelled in the opposite direction.
    pub fn reversed(self) -> Self {
        match self {
            Self::Ascend(module) => Self::Descend(module),
            Self::Descend(module) => Self::Ascend(module),
            Self::Cross { within, from, to } => Self::Cross {
                within,
                from: to,
                to: from,
            },
        }
    }
}

impl ModuleGraph {
    /// Computes the route from `source` to `destination`.
    ///
    /// The route ascends from `source` to the children of the lowest common
    /// ancestor, crosses once between those children, then descends to
    /// `destination`. When one module contains the other, the route is a pure
    /// ascent or descent with no crossing. A module routes to itself through
    /// an empty sequence.
    pub fn find_path(
        &self,
        source: ComponentId,
        destination: ComponentId,
    ) -> Result<Vec<Hop>, ResolutionError> {
        for id in [source, destination] {
            if !self.contains(id) {
                return Err(ResolutionError::NoSuchComponent(id));
            }
        }
        let common = self
            .common_ancestor(source, destination)
            .ok_or(ResolutionError::NoSuchComponent(destination))?;

        let mut hops = Vec::new();
        if source == destination {
            return Ok(hops);
        }

        // Upwards, stopping at the child of `common` unless the destination is
        // `common` itself.
        let mut module = source;
        while module != common && (self.parent(module) != Some(common) || destination == common) {
            hops.push(Hop::Ascend(module));
            module = match self.parent(module) {
                Some(parent) => parent,
                None => break,
            };
        }

        let down = self.ancestry(destination);
        let below_common = down.iter().position(|&id| id == common).unwrap_or(0);

        if common != source && common != destination {
            // `module` is now the child of `common` on the source side.
            hops.push(Hop::Cross {
                within: common,
                from: module,
                to: down[below_common - 1],
            });
            // The destination-side child was entered by the crossing.
            hops.extend(down[..below_common - 1].iter().rev().map(|&id| Hop::Descend(id)));
        } else {
            hops.extend(down[..below_common].iter().rev().map(|&id| Hop::Descend(id)));
        }

        Ok(hops)
    }
}
