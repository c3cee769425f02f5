//! PDF extraction through to stored chunk ids.

use ara_index::config::Config;
use ara_index::extract::ExtractorRegistry;
use ara_index::indexer::Indexer;
use ara_index::models::{IndexPayload, SourceDocument};
use ara_index::store::{Backend, MemoryKv};

/// Minimal valid PDF with one Helvetica text run per page.
/// Builds body then xref with correct byte offsets so pdf-extract can parse it.
fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let page_count = pages.len();
    let first_page_obj = 4;
    let kids: Vec<String> = (0..page_count)
        .map(|i| format!("{} 0 R", first_page_obj + 2 * i))
        .collect();

    let mut objects: Vec<Vec<u8>> = vec![
        b"<< /Type /Catalog /Pages 2 0 R >>".to_vec(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            page_count
        )
        .into_bytes(),
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_vec(),
    ];
    for (i, text) in pages.iter().enumerate() {
        let content_obj = first_page_obj + 2 * i + 1;
        objects.push(
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R /Resources << /Font << /F1 3 0 R >> >> >>",
                content_obj
            )
            .into_bytes(),
        );
        let stream = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", text);
        objects.push(
            format!(
                "<< /Length {} >> stream\n{}\nendstream",
                stream.len(),
                stream
            )
            .into_bytes(),
        );
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj ", i + 1).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b" endobj\n");
    }
    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}

fn letters(count: usize) -> String {
    "abcdefghijklmnopqrstuvwxyz".chars().cycle().take(count).collect()
}

#[test]
fn pdf_pages_extract_with_physical_numbers() {
    let pdf = pdf_with_pages(&["first page", "second page"]);
    let pages = ExtractorRegistry::with_defaults()
        .extract("order.pdf", &pdf)
        .unwrap();
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].page, Some(1));
    assert_eq!(pages[0].text, "first page");
    assert_eq!(pages[1].page, Some(2));
    assert_eq!(pages[1].text, "second page");
}

#[tokio::test]
async fn two_page_pdf_chunks_per_page() {
    let page_one = letters(2500);
    let page_two = letters(80);
    let pdf = pdf_with_pages(&[&page_one, &page_two]);

    let config = Config::minimal();
    let indexer = Indexer::new(
        &config,
        Backend::sharded(MemoryKv::new(), "rag_index", 1024),
    );
    let report = indexer
        .upload(vec![SourceDocument::new("tariff-order.pdf", pdf)])
        .await
        .unwrap();
    assert_eq!(report.indexed_chunks, 4);
    assert_eq!(report.sources, vec!["tariff-order.pdf"]);

    let raw = indexer.read_index().await.unwrap().unwrap();
    let payload: IndexPayload = serde_json::from_str(&raw).unwrap();
    let ids: Vec<_> = payload.chunks.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "tariff-order.pdf-p1-c0",
            "tariff-order.pdf-p1-c1",
            "tariff-order.pdf-p1-c2",
            "tariff-order.pdf-p2-c0",
        ]
    );
    assert_eq!(payload.chunks[0].page, Some(1));
    assert_eq!(payload.chunks[0].text.chars().count(), 1200);
    assert_eq!(payload.chunks[3].text, page_two);
}
