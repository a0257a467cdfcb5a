use std::collections::HashSet;

use crate::types::{Competitor, RankingView, ReorderOp, SessionType};

/// RankingEditor holds the finishing order a user is building for one session.
///
/// Positions are zero-based. Every move that would leave the list is ignored
/// rather than reported, matching the disabled arrow buttons at the ends of
/// the list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankingEditor {
    order: Vec<String>,
}

impl RankingEditor {
    pub fn new(order: Vec<String>) -> Self {
        RankingEditor { order }
    }

    pub fn from_roster(roster: &[Competitor]) -> Self {
        RankingEditor::new(roster.iter().map(|c| c.id.clone()).collect())
    }

    /// Previously stored picks first, in their stored order, then the rest of
    /// the roster. Picks for competitors no longer on the roster are dropped.
    pub fn seeded(roster: &[Competitor], previous: &[String]) -> Self {
        let roster_ids: HashSet<&str> = roster.iter().map(|c| c.id.as_str()).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut order = Vec::with_capacity(roster.len());
        for id in previous {
            if roster_ids.contains(id.as_str()) && seen.insert(id.as_str()) {
                order.push(id.clone());
            }
        }
        for competitor in roster {
            if seen.insert(competitor.id.as_str()) {
                order.push(competitor.id.clone());
            }
        }
        RankingEditor { order }
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn move_up(&mut self, index: usize) {
        if index == 0 || index >= self.order.len() {
            return;
        }
        self.order.swap(index, index - 1);
    }

    pub fn move_down(&mut self, index: usize) {
        if index >= self.order.len().saturating_sub(1) {
            return;
        }
        self.order.swap(index, index + 1);
    }

    /// Drag-and-drop: take the entry at `from` out and reinsert it at `to`,
    /// shifting everything in between by one.
    pub fn move_item(&mut self, from: usize, to: usize) {
        let len = self.order.len();
        if from >= len || to >= len || from == to {
            return;
        }
        let item = self.order.remove(from);
        self.order.insert(to, item);
    }

    pub fn apply(&mut self, op: ReorderOp) {
        match op {
            ReorderOp::MoveUp { index } => self.move_up(index),
            ReorderOp::MoveDown { index } => self.move_down(index),
            ReorderOp::Move { from, to } => self.move_item(from, to),
        }
    }

    pub fn scored_zone(&self, session_type: SessionType) -> &[String] {
        let cut = session_type.limit().min(self.order.len());
        &self.order[..cut]
    }

    pub fn unscored_zone(&self, session_type: SessionType) -> &[String] {
        let cut = session_type.limit().min(self.order.len());
        &self.order[cut..]
    }

    pub fn view(&self, session_type: SessionType) -> RankingView {
        RankingView {
            session_type,
            limit: session_type.limit(),
            ranking: self.order.clone(),
            scored: self.scored_zone(session_type).to_vec(),
            unscored: self.unscored_zone(session_type).to_vec(),
        }
    }
}
