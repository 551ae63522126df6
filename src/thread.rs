//! Reply-tree reconstruction for a single thread.
//!
//! Messages are placed in an arena in the order the store returned them
//! (ascending date). Reply edges are resolved against an index keyed by each
//! message's effective id, so a reply can be linked regardless of whether its
//! parent came before or after it, or is missing entirely.

use crate::models::Message;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    message: Message,
    replies: Vec<usize>,
}

/// A forest of reply trees for one thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadView {
    slots: Vec<Slot>,
    roots: Vec<usize>,
}

impl ThreadView {
    /// Builds the forest from messages already sorted by ascending date.
    ///
    /// Roots keep the order in which their messages appear in `messages`, and
    /// so do the replies of each node. A reply to an unknown id, or to the
    /// message's own id, makes the message a root. Reply cycles are cut at the
    /// earliest message of the cycle, which becomes a root.
    pub fn assemble(messages: Vec<Message>) -> Self {
        let mut index: HashMap<String, usize> = HashMap::with_capacity(messages.len());
        let mut slots: Vec<Slot> = Vec::with_capacity(messages.len());

        for (position, message) in messages.into_iter().enumerate() {
            let key = message.effective_id().to_string();
            if let Some(previous) = index.insert(key, position) {
                let earlier = &slots[previous];
                warn!(
                    effective_id = message.effective_id(),
                    earlier = %earlier.message.id,
                    later = %message.id,
                    "duplicate effective id in thread, later message wins"
                );
            }
            slots.push(Slot {
                message,
                replies: Vec::new(),
            });
        }

        let mut parents: Vec<Option<usize>> = slots
            .iter()
            .map(|slot| {
                let message = &slot.message;
                message
                    .in_reply_to
                    .as_deref()
                    .filter(|reply_to| *reply_to != message.effective_id())
                    .and_then(|reply_to| index.get(reply_to).copied())
            })
            .collect();

        let broken = break_cycles(&mut parents);
        if broken > 0 {
            warn!(cycles = broken, "reply cycle in thread, promoted to root");
        }

        let mut roots = Vec::new();
        for (position, parent) in parents.into_iter().enumerate() {
            match parent {
                Some(parent) => slots[parent].replies.push(position),
                None => roots.push(position),
            }
        }

        debug!(messages = slots.len(), roots = roots.len(), "assembled thread");
        Self { slots, roots }
    }

    pub fn roots(&self) -> impl Iterator<Item = ThreadNode<'_>> + '_ {
        self.roots.iter().map(move |&index| ThreadNode { view: self, index })
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    /// Number of messages in the forest, at every depth.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Pre-order traversal yielding each node with its depth (roots are 0).
    pub fn walk(&self) -> Walk<'_> {
        let stack = self.roots.iter().rev().map(|&index| (index, 0)).collect();
        Walk { view: self, stack }
    }
}

/// Cuts every cycle in the parent links, returning how many were cut.
fn break_cycles(parents: &mut [Option<usize>]) -> usize {
    #[derive(Clone, Copy)]
    enum Mark {
        Unvisited,
        OnPath(usize),
        Done,
    }

    let mut marks = vec![Mark::Unvisited; parents.len()];
    let mut path: Vec<usize> = Vec::new();
    let mut broken = 0;

    for start in 0..parents.len() {
        let mut cursor = Some(start);
        while let Some(node) = cursor {
            match marks[node] {
                Mark::Done => break,
                Mark::OnPath(position) => {
                    if let Some(&first) = path[position..].iter().min() {
                        parents[first] = None;
                        broken += 1;
                    }
                    break;
                }
                Mark::Unvisited => {
                    marks[node] = Mark::OnPath(path.len());
                    path.push(node);
                    cursor = parents[node];
                }
            }
        }
        for node in path.drain(..) {
            marks[node] = Mark::Done;
        }
    }

    broken
}

/// A message in a [`ThreadView`] together with its replies.
#[derive(Clone, Copy)]
pub struct ThreadNode<'a> {
    view: &'a ThreadView,
    index: usize,
}

impl<'a> ThreadNode<'a> {
    pub fn message(&self) -> &'a Message {
        &self.view.slots[self.index].message
    }

    pub fn replies(&self) -> impl Iterator<Item = ThreadNode<'a>> + 'a {
        let view = self.view;
        view.slots[self.index]
            .replies
            .iter()
            .map(move |&index| ThreadNode { view, index })
    }

    pub fn reply_count(&self) -> usize {
        self.view.slots[self.index].replies.len()
    }
}

impl fmt::Debug for ThreadNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadNode")
            .field("id", &self.message().id)
            .field("replies", &self.replies().collect::<Vec<_>>())
            .finish()
    }
}

pub struct Walk<'a> {
    view: &'a ThreadView,
    stack: Vec<(usize, usize)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (usize, ThreadNode<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        let (index, depth) = self.stack.pop()?;
        let replies = &self.view.slots[index].replies;
        self.stack
            .extend(replies.iter().rev().map(|&reply| (reply, depth + 1)));
        Some((
            depth,
            ThreadNode {
                view: self.view,
                index,
            },
        ))
    }
}

impl Serialize for ThreadView {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.roots())
    }
}

impl Serialize for ThreadNode<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Replies<'a>(ThreadNode<'a>);

        impl Serialize for Replies<'_> {
            fn serialize<R: Serializer>(&self, serializer: R) -> Result<R::Ok, R::Error> {
                serializer.collect_seq(self.0.replies())
            }
        }

        let mut node = serializer.serialize_struct("ThreadNode", 2)?;
        node.serialize_field("message", self.message())?;
        node.serialize_field("replies", &Replies(*self))?;
        node.end()
    }
}
