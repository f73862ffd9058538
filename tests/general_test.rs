use cfgpp_core::render::render_document;
use cfgpp_core::Parser;
use miette::Report;
use std::fs;

#[test]
fn test_all_fixture_files_parse_and_round_trip() {
    let fixtures_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/ok");
    let entries = fs::read_dir(fixtures_dir).expect("Failed to read fixtures directory");
    let parser = Parser::new();
    let mut parsed = 0;

    for entry in entries {
        let entry = entry.expect("Failed to read directory entry");
        let path = entry.path();

        if path.is_file() && path.extension().map_or(false, |ext| ext == "cfgpp") {
            println!("Parsing file: {:?}", path);
            let document = match parser.parse_file(&path) {
                Ok(document) => document,
                Err(err) => panic!("Failed to parse {:?}. Error: {:?}", path, Report::new(err)),
            };

            let rendered = render_document(&document);
            let reparsed = parser
                .parse_str(&rendered, "rendered.cfgpp")
                .unwrap_or_else(|err| panic!("Rendered {:?} does not parse: {:?}", path, Report::new(err)));
            assert_eq!(reparsed, document, "Round trip changed {:?}:\n{}", path, rendered);
            parsed += 1;
        }
    }

    assert!(parsed >= 5, "expected the fixture set, parsed {parsed}");
}
