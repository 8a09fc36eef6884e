use playurl::{AdapterRegistry, ContentType, KNOWN_PROVIDERS};

pub fn cmd_providers() {
    let registry = AdapterRegistry::default();

    println!("{:>3}  {:<12} {:<8} {:<8} adapter", "id", "name", "quality", "content");
    for d in KNOWN_PROVIDERS {
        let content = match d.default_content_type {
            ContentType::OnDemand => "vod",
            ContentType::Live => "live",
        };
        let adapter = if d.id.is_identity() {
            "none (identity)"
        } else {
            registry.builder_for(d.id).name()
        };
        println!(
            "{:>3}  {:<12} {:<8} {:<8} {adapter}",
            d.id.0,
            d.name,
            d.default_quality.code(),
            content
        );
    }
}
