// ABOUTME: Streaming part merge for message content
// ABOUTME: Adjacent same-kind parts concatenate, everything else keeps its order

use crate::message::MessagePart;

/// Append one part, concatenating into the tail when the kinds match.
///
/// This is the incremental form used while a response streams in;
/// folding a sequence through it is exactly [`merge_parts`].
pub fn append_part(parts: &mut Vec<MessagePart>, part: MessagePart) {
    if let Some(last) = parts.last_mut() {
        if last.try_concat(&part) {
            return;
        }
    }
    parts.push(part);
}

/// Merge adjacent same-kind parts. The input is left untouched.
pub fn merge_parts(parts: &[MessagePart]) -> Vec<MessagePart> {
    parts
        .iter()
        .cloned()
        .fold(Vec::with_capacity(parts.len()), |mut acc, part| {
            append_part(&mut acc, part);
            acc
        })
}
