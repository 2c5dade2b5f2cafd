use membership_net::{data_types::ViewId, destination::Destination};
use serde::{Deserialize, Serialize};

use crate::member::Member;

/// An immutable snapshot of the members currently considered live. A new view replaces the
/// previous one wholesale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    view_id: ViewId,
    creator: Option<Member>,
    members: Vec<Member>,
    crashed: Vec<Member>,
}

impl View {
    pub fn new(view_id: ViewId, creator: Option<Member>, members: Vec<Member>) -> Self {
        Self::with_crashed(view_id, creator, members, Vec::new())
    }

    /// A view that also records the members the membership protocol declared crashed
    pub fn with_crashed(view_id: ViewId, creator: Option<Member>, members: Vec<Member>, crashed: Vec<Member>) -> Self {
        Self {
            view_id,
            creator,
            members,
            crashed,
        }
    }

    pub fn view_id(self: &Self) -> ViewId { self.view_id }
    pub fn creator(self: &Self) -> Option<&Member> { self.creator.as_ref() }
    pub fn members(self: &Self) -> &[Member] { &self.members }
    pub fn crashed(self: &Self) -> &[Member] { &self.crashed }

    pub fn len(self: &Self) -> usize { self.members.len() }
    pub fn is_empty(self: &Self) -> bool { self.members.is_empty() }

    pub fn contains(self: &Self, member: &Member) -> bool { self.members.contains(member) }

    /// The member listening at `destination`, if there is one in this view
    pub fn member_at(self: &Self, destination: &Destination) -> Option<&Member> {
        self.members
            .iter()
            .find(|m| m.port() == destination.port() && m.host() == destination.host())
    }

    /// Members that were live in `previous` and are not live in this view. Without a previous
    /// view, the members this view declares crashed. A member already declared crashed by
    /// `previous` is not reported again
    pub fn crashed_members(self: &Self, previous: Option<&View>) -> Vec<Member> {
        match previous {
            Some(previous) => previous
                .members
                .iter()
                .filter(|m| !previous.crashed.contains(m))
                .filter(|m| !self.members.contains(m) || self.crashed.contains(m))
                .cloned()
                .collect(),
            None => self.crashed.clone(),
        }
    }
}
