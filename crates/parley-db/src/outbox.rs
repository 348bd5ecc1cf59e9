/// Side effects recorded during a write transaction.
///
/// Nothing pushed here runs until [`crate::Database::transaction`] has
/// committed; a rolled-back transaction drops its outbox, and any resources
/// the effects own are released through their `Drop` impls.
#[derive(Debug)]
pub struct Outbox<Ev> {
    effects: Vec<Ev>,
}

impl<Ev> Outbox<Ev> {
    pub fn new() -> Self {
        Self { effects: Vec::new() }
    }

    pub fn push(&mut self, effect: Ev) {
        self.effects.push(effect);
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub(crate) fn into_effects(self) -> Vec<Ev> {
        self.effects
    }
}

impl<Ev> Default for Outbox<Ev> {
    fn default() -> Self {
        Self::new()
    }
}
