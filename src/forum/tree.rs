//! Reply tree reconstruction for a thread's flat comment list.
//!
//! Everything here is iterative, so arbitrarily deep reply chains (or a
//! malicious parent cycle) cannot exhaust the stack.

use std::collections::HashMap;
use tracing::warn;

use super::types::{Comment, CommentId};

/// A comment with its replies, newest first.
#[derive(Debug)]
pub struct CommentNode {
  comment: Comment,
  children: Vec<CommentNode>,
}

impl CommentNode {
  pub fn comment(&self) -> &Comment {
    &self.comment
  }

  pub fn children(&self) -> &[CommentNode] {
    &self.children
  }
}

impl Drop for CommentNode {
  fn drop(&mut self) {
    // Flatten before dropping so deep chains don't recurse
    let mut pending = std::mem::take(&mut self.children);
    while let Some(mut node) = pending.pop() {
      pending.append(&mut node.children);
    }
  }
}

/// Pre-order iterator returned by [`walk_forest`].
pub struct Walk<'a> {
  stack: Vec<(usize, &'a CommentNode)>,
}

impl<'a> Iterator for Walk<'a> {
  type Item = (usize, &'a CommentNode);

  fn next(&mut self) -> Option<Self::Item> {
    let (depth, node) = self.stack.pop()?;
    self
      .stack
      .extend(node.children.iter().rev().map(|child| (depth + 1, child)));
    Some((depth, node))
  }
}

/// Pre-order traversal over a whole forest, roots in order.
pub fn walk_forest(roots: &[CommentNode]) -> Walk<'_> {
  Walk {
    stack: roots.iter().rev().map(|root| (0, root)).collect(),
  }
}

/// Build the reply forest for a set of comments.
///
/// - Duplicate ids: the last occurrence is the one replies attach to
/// - A reply whose parent is not in the set becomes a root
/// - A parent cycle is broken by making its earliest member (input order) a root
/// - Siblings and roots are ordered newest first; ties keep input order
pub fn build_tree(comments: Vec<Comment>) -> Vec<CommentNode> {
  let count = comments.len();

  let mut index: HashMap<CommentId, usize> = HashMap::with_capacity(count);
  for (position, comment) in comments.iter().enumerate() {
    index.insert(comment.id, position);
  }

  let mut parent: Vec<Option<usize>> = comments
    .iter()
    .map(|comment| {
      comment
        .parent_comment_id
        .and_then(|id| index.get(&id).copied())
    })
    .collect();

  break_cycles(&comments, &mut parent);

  let mut roots = Vec::new();
  let mut children: Vec<Vec<usize>> = vec![Vec::new(); count];
  for position in 0..count {
    match parent[position] {
      Some(p) => children[p].push(position),
      None => roots.push(position),
    }
  }

  // Stable sort, newest first
  let newest_first = |a: &usize, b: &usize| comments[*b].created_at.cmp(&comments[*a].created_at);
  roots.sort_by(newest_first);
  for siblings in &mut children {
    siblings.sort_by(newest_first);
  }

  // Top-down order, so that reversing it visits children before parents
  let mut order = Vec::with_capacity(count);
  let mut queue = roots.clone();
  while let Some(position) = queue.pop() {
    order.push(position);
    queue.extend(children[position].iter().copied());
  }

  let mut comments: Vec<Option<Comment>> = comments.into_iter().map(Some).collect();
  let mut built: Vec<Option<CommentNode>> = (0..count).map(|_| None).collect();
  for &position in order.iter().rev() {
    let node_children = children[position]
      .iter()
      .filter_map(|&child| built[child].take())
      .collect();
    if let Some(comment) = comments[position].take() {
      built[position] = Some(CommentNode {
        comment,
        children: node_children,
      });
    }
  }

  roots
    .iter()
    .filter_map(|&position| built[position].take())
    .collect()
}

/// Walk every parent chain once; when a chain runs back into itself,
/// detach the cycle member that came first in the input. A comment that is
/// its own parent is a cycle of one.
fn break_cycles(comments: &[Comment], parent: &mut [Option<usize>]) {
  #[derive(Clone, Copy, PartialEq)]
  enum Mark {
    Unvisited,
    InProgress,
    Done,
  }

  let mut marks = vec![Mark::Unvisited; parent.len()];
  let mut path: Vec<usize> = Vec::new();

  for start in 0..parent.len() {
    if marks[start] != Mark::Unvisited {
      continue;
    }

    path.clear();
    let mut current = Some(start);
    while let Some(position) = current {
      match marks[position] {
        Mark::Done => break,
        Mark::InProgress => {
          let cycle_start = path
            .iter()
            .position(|&p| p == position)
            .unwrap_or_default();
          let cycle = &path[cycle_start..];
          if let Some(&earliest) = cycle.iter().min() {
            let ids: Vec<CommentId> = cycle.iter().map(|&p| comments[p].id).collect();
            warn!(
              "Reply cycle between comments {:?}, treating comment {} as top-level",
              ids, comments[earliest].id
            );
            parent[earliest] = None;
          }
          break;
        }
        Mark::Unvisited => {
          marks[position] = Mark::InProgress;
          path.push(position);
          current = parent[position];
        }
      }
    }

    for &position in &path {
      marks[position] = Mark::Done;
    }
  }
}
