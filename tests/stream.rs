use iffcodex_lib::prelude::*;

fn aiff(tree: &mut Tree) -> NodeId {
    let form = tree.form("AIFF");
    let comm = CommonChunk::new(1, 4, 8, 8000.0).unwrap();
    let ssnd = SoundDataChunk::new(0, 0, &[1, 2, 3, 4]).unwrap();
    tree.push(form, Item::Many(vec![
        Item::Extension(Box::new(comm)),
        Item::Extension(Box::new(ssnd)),
        Item::Chunk(Chunk::with_data("NAME", "tone")),
    ]))
    .unwrap();
    form
}

#[test]
fn test_reader_into_writer() {
    let mut tree = Tree::with_registry(AifCodec.registry().unwrap());
    let form = aiff(&mut tree);
    let bytes = tree.to_bytes(form).unwrap();

    let mut streamed = Vec::new();
    std::io::copy(&mut tree.reader(form), &mut streamed).unwrap();
    assert_eq!(streamed, bytes);

    let target = tree.form("AIIF");
    let mut writer = tree.writer(target);
    std::io::copy(&mut streamed.as_slice(), &mut writer).unwrap();
    assert_eq!(writer.finish().unwrap(), 1);

    assert_eq!(tree.group(target).unwrap().subtype(), "AIFF");
    assert!(tree.deep_eq(target, form));
    let comm = tree.children(target).unwrap()[0];
    assert_eq!(tree.extension::<CommonChunk>(comm).unwrap().sample_rate(), 8000.0);
}

#[test]
fn test_byte_by_byte_writes() {
    let mut tree = Tree::new();
    let form = aiff(&mut tree);
    let bytes = tree.to_bytes(form).unwrap();

    let target = tree.form("NONE");
    let mut writer = tree.writer(target);
    for byte in &bytes {
        writer.write_all(std::slice::from_ref(byte)).unwrap();
    }
    // a second frame replaces the first
    writer.write_all(&bytes).unwrap();
    assert_eq!(writer.frames(), 2);
    assert_eq!(writer.finish().unwrap(), 2);
    assert_eq!(tree.len(target).unwrap(), 3);
}

#[test]
fn test_unfinished_stream_is_reported() {
    let mut tree = Tree::new();
    let form = aiff(&mut tree);
    let bytes = tree.to_bytes(form).unwrap();

    let target = tree.form("AIFF");
    let mut writer = tree.writer(target);
    writer.write_all(&bytes[..5]).unwrap();
    assert!(writer.finish().is_err());
    assert!(tree.is_empty(target).unwrap());
}

#[test]
fn test_reader_small_buffers() {
    let mut tree = Tree::new();
    let form = aiff(&mut tree);

    let mut reader = tree.reader(form);
    let mut out = Vec::new();
    let mut buf = [0u8; 3];
    loop {
        let n = reader.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    assert_eq!(out, tree.to_bytes(form).unwrap());
}
