use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};

use crate::memory::WorldSnapshot;

pub fn builtin_worlds() -> HashMap<&'static str, &'static str> {
    HashMap::from([("demo", include_str!("../content/worlds/demo.json"))])
}

pub fn builtin_world(name: &str) -> Result<WorldSnapshot> {
    let raw = builtin_worlds()
        .get(name)
        .copied()
        .ok_or_else(|| anyhow!("unknown builtin world {name:?}"))?;
    WorldSnapshot::from_json(raw).with_context(|| format!("builtin world {name:?} is malformed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_world_parses() {
        let world = builtin_world("demo").unwrap();
        assert!(world.actors.iter().any(|a| a.name == "Elara"));
        assert!(world.packs.iter().any(|p| !p.pages.is_empty()));
    }

    #[test]
    fn unknown_world_is_an_error() {
        assert!(builtin_world("nowhere").is_err());
    }
}
