use crate::types::{ThreadHandle, WaitChannelId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    /// Woken, queued to take the processor back.
    Ready,
    Sleeping(WaitChannelId),
}

pub struct ThreadControlBlock {
    pub handle: ThreadHandle,
    pub name: String,
    pub state: ThreadState,
    pub context: SavedContext,
}

impl ThreadControlBlock {
    pub fn new(handle: ThreadHandle, name: &str) -> Self {
        Self {
            handle,
            name: name.to_string(),
            state: ThreadState::Running,
            context: SavedContext::default(),
        }
    }
}

/// Who holds the raised interrupt level, and how deeply it is nested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelState {
    pub owner: Option<ThreadHandle>,
    pub depth: usize,
}

/// Interrupt nesting a sleeping thread must get back when it resumes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SavedContext {
    pub spl_depth: usize,
}

impl SavedContext {
    /// Take the level away from its owner, remembering the nesting.
    pub fn save_from(&mut self, level: &mut LevelState) {
        self.spl_depth = level.depth;
        *level = LevelState::default();
    }

    pub fn restore_to(&self, level: &mut LevelState, thread: ThreadHandle) {
        level.owner = Some(thread);
        level.depth = self.spl_depth;
    }
}
