use crate::cache::handle::ModelHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupSource {
    /// Group 0, the model owning the graph.
    Owner,
    /// Pulled in through an include, holding a reference on the included model.
    Included { label: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualGroup {
    pub handle: ModelHandle,
    pub source: GroupSource,
    /// Index of the group's first sequence in the combined sequence list.
    pub first_sequence: usize,
}

/// The models a model includes, flattened into groups with one combined sequence list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualModel {
    groups: Vec<VirtualGroup>,
    num_sequences: usize,
    autoplay: Vec<u16>,
}

impl VirtualModel {
    pub fn new(owner: ModelHandle, owner_sequences: usize, owner_autoplay: &[u16]) -> Self {
        Self {
            groups: vec![VirtualGroup {
                handle: owner,
                source: GroupSource::Owner,
                first_sequence: 0,
            }],
            num_sequences: owner_sequences,
            autoplay: owner_autoplay.to_vec(),
        }
    }

    /// Appends an included model whose sequences follow everything added so far.
    pub fn include(&mut self, handle: ModelHandle, label: &str, name: &str, sequences: usize, autoplay: &[u16]) {
        let first_sequence = self.num_sequences;
        self.groups.push(VirtualGroup {
            handle,
            source: GroupSource::Included {
                label: label.to_string(),
                name: name.to_string(),
            },
            first_sequence,
        });
        self.autoplay
            .extend(autoplay.iter().map(|sequence| (first_sequence + *sequence as usize) as u16));
        self.num_sequences += sequences;
    }

    pub fn groups(&self) -> &[VirtualGroup] {
        &self.groups
    }

    pub fn group(&self, index: usize) -> Option<&VirtualGroup> {
        self.groups.get(index)
    }

    pub fn owner(&self) -> ModelHandle {
        self.groups[0].handle
    }

    pub fn included(&self) -> impl Iterator<Item = &VirtualGroup> {
        self.groups.iter().skip(1)
    }

    pub fn num_sequences(&self) -> usize {
        self.num_sequences
    }

    /// Autoplay sequences, as indices into the combined sequence list.
    pub fn autoplay_sequences(&self) -> &[u16] {
        &self.autoplay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn included_sequences_are_offset() {
        let owner = ModelHandle::new(0, 0);
        let mut model = VirtualModel::new(owner, 3, &[1]);
        model.include(ModelHandle::new(1, 0), "gestures", "models/gestures.mdl", 4, &[0, 2]);
        model.include(ModelHandle::new(2, 0), "idle", "models/idle.mdl", 2, &[1]);

        assert_eq!(model.owner(), owner);
        assert_eq!(model.groups().len(), 3);
        assert_eq!(model.group(2).map(|group| group.first_sequence), Some(7));
        assert_eq!(model.num_sequences(), 9);
        assert_eq!(model.autoplay_sequences(), &[1, 3, 5, 8]);
        assert_eq!(model.included().count(), 2);
    }
}
