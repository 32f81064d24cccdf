use crate::prelude::*;
use base64::{Engine as _, engine::general_purpose};
use serde_json::{Value, json};

/// Renders `node` and everything below it as JSON. Leaf payloads are
/// base64 encoded; leaves the codec knows also carry a `description`.
pub fn to_json(tree: &Tree, node: NodeId, codec: &dyn Codec) -> R<Value> {
    match tree.node(node)? {
        Node::Group(group) => {
            let children = group
                .children()
                .iter()
                .map(|&child| to_json(tree, child, codec))
                .collect::<R<Vec<_>>>()?;

            Ok(json!({
                "id": group.id().to_string(),
                "type": group.subtype().to_string(),
                "kind": format!("{:?}", group.kind()),
                "size": tree.size(node)?,
                "children": children,
            }))
        }
        leaf => {
            let chunk = tree.chunk(node)?;
            let mut value = json!({
                "id": chunk.id().to_string(),
                "size": chunk.size(),
                "data": general_purpose::STANDARD.encode(chunk.data()),
            });
            if let Some(ext) = leaf.as_extension() {
                value["extension"] = json!(ext.name());
            }
            if let Some(description) = codec.describe(tree, node) {
                value["description"] = json!(description);
            }
            Ok(value)
        }
    }
}
