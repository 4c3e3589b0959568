use std::fs;
use std::path::PathBuf;

use pageturn::{
    BlockRole, BookError, ContentParser, DefaultContentParser, DirectoryLoader, IndexKind, Loader,
};

fn fixture_root() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("crates/pageturn-render/tests/fixtures/harbor-town");
    path
}

#[test]
fn directory_book_resolves_every_chapter() {
    let loader = DirectoryLoader::new(fixture_root());
    let book = loader.init_table_of_contents().expect("fixture toc");
    assert_eq!(book.title(), "harbor-town");
    assert_eq!(book.child_count(), 2);
    assert_eq!(book.chapter_count(), 5);

    let ranges: Vec<(usize, usize)> = book
        .volumes()
        .map(|volume| (volume.range().from, volume.range().to))
        .collect();
    assert_eq!(ranges, vec![(1, 4), (4, 6)]);

    for index in 1..=book.chapter_count() {
        let chapter = book.resolve(index).expect("chapter");
        assert_eq!(chapter.index(), index);
        let volume = book.volume_of(index).expect("range").expect("volume");
        assert!(volume.range().contains(index));
    }
    assert!(matches!(
        book.resolve(0),
        Err(BookError::IndexOutOfRange {
            kind: IndexKind::Chapter,
            index: 0,
            len: 5
        })
    ));
}

#[test]
fn fetched_chapter_parses_into_title_and_paragraphs() {
    let loader = DirectoryLoader::new(fixture_root());
    let book = loader.init_table_of_contents().expect("fixture toc");
    let chapter = book.resolve(1).expect("chapter 1");
    assert!(!chapter.has_content());

    let content = loader.fetch_content(chapter).expect("fetch");
    assert!(chapter.publish_content(content));
    let parsed = DefaultContentParser.parse(chapter).expect("parse");

    let roles: Vec<BlockRole> = parsed.blocks.iter().map(|block| block.role).collect();
    assert_eq!(
        roles,
        vec![
            BlockRole::Title,
            BlockRole::Paragraph,
            BlockRole::Paragraph,
            BlockRole::Paragraph
        ]
    );
    assert_eq!(parsed.blocks[0].text, "The Harbor");
    assert!(parsed.blocks.iter().all(|block| block.text == block.text.trim()));
}

#[test]
fn fixture_files_are_utf8_text() {
    let loader = DirectoryLoader::new(fixture_root());
    let book = loader.init_table_of_contents().expect("fixture toc");
    for chapter in book.chapters() {
        let content = loader.fetch_content(chapter).expect("fetch");
        assert!(!content.trim().is_empty(), "chapter {} is empty", chapter.index());
    }
    assert!(fs::metadata(fixture_root()).expect("fixture dir").is_dir());
}
