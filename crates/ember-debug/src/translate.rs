//! Function/class id ↔ snapshot offset translation.
//!
//! Connected to a VM running from a snapshot, the wire carries symbolic
//! snapshot offsets instead of compiler ids. The mapping is derived once
//! during initialization from the current compilation system and the
//! snapshot's name/offset tables, and is immutable afterwards.

use std::collections::HashMap;

use ember_wire::IdTranslate;

use crate::info::NameOffsetMapping;
use crate::program::ProgramSystem;

/// Bidirectional id ↔ offset tables for functions and classes.
#[derive(Debug, Clone, Default)]
pub struct IdOffsetMapping {
    function_to_offset: HashMap<u32, u32>,
    function_from_offset: HashMap<u32, u32>,
    class_to_offset: HashMap<u32, u32>,
    class_from_offset: HashMap<u32, u32>,
}

impl IdOffsetMapping {
    /// Join the system's id → name tables with the info file's
    /// name → offset tables.
    pub fn from_system(system: &ProgramSystem, names: &NameOffsetMapping) -> Self {
        let mut mapping = Self::default();
        for function in system.functions() {
            if let Some(&offset) = names.function_offsets.get(&function.name) {
                mapping.function_to_offset.insert(function.id, offset);
                mapping.function_from_offset.insert(offset, function.id);
            }
        }
        for class in system.classes() {
            if let Some(&offset) = names.class_offsets.get(&class.name) {
                mapping.class_to_offset.insert(class.id, offset);
                mapping.class_from_offset.insert(offset, class.id);
            }
        }
        mapping
    }

    pub fn function_offset(&self, id: u32) -> Option<u32> {
        self.function_to_offset.get(&id).copied()
    }

    pub fn function_id(&self, offset: u32) -> Option<u32> {
        self.function_from_offset.get(&offset).copied()
    }

    pub fn class_offset(&self, id: u32) -> Option<u32> {
        self.class_to_offset.get(&id).copied()
    }

    pub fn class_id(&self, offset: u32) -> Option<u32> {
        self.class_from_offset.get(&offset).copied()
    }
}

/// The translation applied at every encode/decode site.
///
/// Outside snapshot mode ids pass through unchanged. Ids without a mapping
/// also pass through; the VM rejects them if they are genuinely unknown.
#[derive(Debug, Clone, Default)]
pub enum IdTranslator {
    #[default]
    Identity,
    Offset(IdOffsetMapping),
}

impl IdTranslate for IdTranslator {
    fn function_to_wire(&self, id: u32) -> u32 {
        match self {
            IdTranslator::Identity => id,
            IdTranslator::Offset(mapping) => mapping.function_offset(id).unwrap_or(id),
        }
    }

    fn function_from_wire(&self, id: u32) -> u32 {
        match self {
            IdTranslator::Identity => id,
            IdTranslator::Offset(mapping) => mapping.function_id(id).unwrap_or(id),
        }
    }

    fn class_to_wire(&self, id: u32) -> u32 {
        match self {
            IdTranslator::Identity => id,
            IdTranslator::Offset(mapping) => mapping.class_offset(id).unwrap_or(id),
        }
    }

    fn class_from_wire(&self, id: u32) -> u32 {
        match self {
            IdTranslator::Identity => id,
            IdTranslator::Offset(mapping) => mapping.class_id(id).unwrap_or(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{ClassInfo, FunctionInfo, FunctionKind, SourceMap};
    use std::collections::HashMap;

    fn system() -> ProgramSystem {
        ProgramSystem::new(
            vec![
                FunctionInfo {
                    id: 1,
                    name: "main".into(),
                    kind: FunctionKind::Normal,
                    source_map: SourceMap::default(),
                },
                FunctionInfo {
                    id: 2,
                    name: "main.fib".into(),
                    kind: FunctionKind::Normal,
                    source_map: SourceMap::default(),
                },
            ],
            vec![ClassInfo {
                id: 5,
                name: "List".into(),
            }],
        )
    }

    fn names() -> NameOffsetMapping {
        NameOffsetMapping {
            snapshot_hash: 1,
            function_offsets: HashMap::from([("main".into(), 100), ("main.fib".into(), 200)]),
            class_offsets: HashMap::from([("List".into(), 300)]),
        }
    }

    #[test]
    fn translate_mapping_is_bidirectional() {
        let mapping = IdOffsetMapping::from_system(&system(), &names());
        assert_eq!(mapping.function_offset(2), Some(200));
        assert_eq!(mapping.function_id(200), Some(2));
        assert_eq!(mapping.class_offset(5), Some(300));
        assert_eq!(mapping.class_id(300), Some(5));
        assert_eq!(mapping.function_offset(9), None);
    }

    #[test]
    fn translate_identity_passes_through() {
        let translator = IdTranslator::Identity;
        assert_eq!(translator.function_to_wire(17), 17);
        assert_eq!(translator.function_from_wire(17), 17);
        assert_eq!(translator.class_to_wire(4), 4);
        assert_eq!(translator.class_from_wire(4), 4);
    }

    #[test]
    fn translate_offset_maps_both_directions() {
        let translator = IdTranslator::Offset(IdOffsetMapping::from_system(&system(), &names()));
        assert_eq!(translator.function_to_wire(1), 100);
        assert_eq!(translator.function_from_wire(100), 1);
        assert_eq!(translator.class_to_wire(5), 300);
        assert_eq!(translator.class_from_wire(300), 5);
    }

    #[test]
    fn translate_unmapped_ids_pass_through() {
        let translator = IdTranslator::Offset(IdOffsetMapping::from_system(&system(), &names()));
        assert_eq!(translator.function_to_wire(42), 42);
        assert_eq!(translator.function_from_wire(42), 42);
    }

    #[test]
    fn translate_functions_missing_from_info_file_are_skipped() {
        let mut names = names();
        names.function_offsets.remove("main.fib");
        let mapping = IdOffsetMapping::from_system(&system(), &names);
        assert_eq!(mapping.function_offset(1), Some(100));
        assert_eq!(mapping.function_offset(2), None);
    }
}
