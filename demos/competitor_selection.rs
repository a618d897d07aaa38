//! Mock competitor-selection pipeline traced end to end.
//!
//! This example demonstrates:
//! - Opening a run with metadata and subdividing it into named steps
//! - Attaching input, reasoning, output, filters, and per-candidate
//!   evaluations to each step
//! - Reading the finished trace back to print a summary
//!
//! The pipeline itself is mock business logic: generate search keywords from
//! a product title, rank a fixed catalog of candidates against them, then
//! filter on price, rating, and review count and pick the best survivor.

use anyhow::Result;
use glassbox::{MemoryStore, RunId, Status, Store, Tracer};
use serde::Serialize;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Serialize)]
struct Product {
    asin: &'static str,
    title: &'static str,
    category: &'static str,
    price: f64,
    rating: f64,
    reviews: u32,
}

const REFERENCE_PRODUCT: Product = Product {
    asin: "B0XYZ123",
    title: "ProBrand Steel Bottle 32oz Insulated",
    category: "Sports & Outdoors",
    price: 29.99,
    rating: 4.2,
    reviews: 1247,
};

/// Mock catalog: some candidates pass the filters, some are there to be
/// rejected, and some are unrelated products from other categories.
fn mock_candidates() -> Vec<Product> {
    macro_rules! product {
        ($asin:expr, $title:expr, $category:expr, $price:expr, $rating:expr, $reviews:expr) => {
            Product {
                asin: $asin,
                title: $title,
                category: $category,
                price: $price,
                rating: $rating,
                reviews: $reviews,
            }
        };
    }
    vec![
        // Water bottles
        product!("B0COMP01", "HydroFlask 32oz Wide Mouth Water Bottle", "Sports & Outdoors", 44.99, 4.5, 8932),
        product!("B0COMP02", "Yeti Rambler 26oz Insulated Bottle", "Sports & Outdoors", 34.99, 4.4, 5621),
        product!("B0COMP03", "Generic Water Bottle 32oz", "Sports & Outdoors", 8.99, 3.2, 45),
        product!("B0COMP07", "Stanley Adventure Quencher Tumbler", "Sports & Outdoors", 35.00, 4.3, 4102),
        product!("B0COMP09", "CamelBak Eddy+ 32oz Water Bottle", "Sports & Outdoors", 24.99, 4.0, 8921),
        product!("B0COMP10", "Nalgene Wide Mouth 32oz Bottle", "Sports & Outdoors", 12.99, 4.2, 15234),
        // Accessories and false positives
        product!("B0COMP04", "Bottle Cleaning Brush Set", "Home & Kitchen", 12.99, 4.6, 3421),
        product!("B0COMP05", "Replacement Lid for HydroFlask", "Sports & Outdoors", 9.99, 4.3, 234),
        product!("B0COMP06", "Water Bottle Carrier Bag with Strap", "Sports & Outdoors", 15.99, 4.1, 567),
        product!("B0COMP08", "Premium Titanium Water Bottle", "Sports & Outdoors", 89.00, 4.8, 234),
        // Unrelated categories
        product!("B0COMP11", "Ergonomic Office Chair with Lumbar Support", "Home & Kitchen", 159.99, 4.4, 2311),
        product!("B0COMP14", "Seat Cushion for Office Chair Memory Foam", "Home & Kitchen", 39.99, 4.6, 12433),
        product!("B0COMP15", "Wireless Bluetooth Earbuds Noise Cancelling", "Electronics", 79.99, 4.5, 5234),
        product!("B0COMP18", "Replacement Ear Tips for Earbuds (Pack of 6)", "Electronics", 7.99, 4.7, 21045),
        product!("B0COMP19", "Stainless Steel Coffee Maker 12 Cup", "Home & Kitchen", 45.00, 4.3, 2891),
        product!("B0COMP21", "Coffee Filter Paper 100 Pack", "Home & Kitchen", 6.49, 4.8, 50231),
    ]
}

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "for", "with", "and", "or", "of", "in", "on", "at", "to", "pack", "set",
];

fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() > 1 && !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

const ACCESSORY_TERMS: &[&str] = &[
    "replacement", "lid", "tips", "filter", "paper", "cushion", "brush", "carrier", "bag",
];

struct Score {
    score: f64,
    overlap: Vec<String>,
    category_match: bool,
    accessory_hits: Vec<String>,
}

/// Demo-friendly approximation of a search API's ranking: token overlap with
/// the keyword, plus a category boost, minus an accessory penalty.
fn score_candidate(primary_keyword: &str, category: &str, candidate: &Product) -> Score {
    let keyword_tokens = tokenize(primary_keyword);
    let title_tokens = tokenize(candidate.title);

    let overlap: Vec<String> = keyword_tokens.intersection(&title_tokens).cloned().collect();
    let mut score = overlap.len() as f64;

    let category_match = candidate.category.eq_ignore_ascii_case(category);
    if category_match {
        score += 1.5;
    }

    let accessory_hits: Vec<String> = title_tokens
        .iter()
        .filter(|t| ACCESSORY_TERMS.contains(&t.as_str()))
        .cloned()
        .collect();
    if !accessory_hits.is_empty() {
        score -= 1.0;
    }

    Score {
        score,
        overlap,
        category_match,
        accessory_hits,
    }
}

/// Mock keyword generation: stop-word filtering plus a few title variations.
fn generate_keywords(title: &str, category: &str) -> Vec<String> {
    let title_lower = title.to_lowercase();
    let important: Vec<&str> = title_lower
        .split_whitespace()
        .filter(|w| !STOP_WORDS.contains(w))
        .collect();

    let mut keywords = vec![title_lower.clone()];
    if !important.is_empty() {
        keywords.push(important.join(" "));
    }
    if important.len() >= 2 {
        keywords.push(important[..important.len().min(3)].join(" "));
        keywords.push(important[..2].join(" "));
    }
    if !important.is_empty() {
        keywords.push(important[0].to_string());
        keywords.push(format!(
            "{} {}",
            important[..important.len().min(2)].join(" "),
            category.to_lowercase()
        ));
    }

    let mut seen = BTreeSet::new();
    keywords.retain(|kw| !kw.is_empty() && seen.insert(kw.clone()));
    keywords.truncate(5);
    keywords
}

fn evaluation(candidate: &Product, filter_results: Value, qualified: bool) -> Value {
    json!({
        "asin": candidate.asin,
        "title": candidate.title,
        "metrics": {
            "price": candidate.price,
            "rating": candidate.rating,
            "reviews": candidate.reviews,
        },
        "filter_results": filter_results,
        "qualified": qualified,
    })
}

async fn run_pipeline(tracer: &Tracer, reference: &Product) -> Result<RunId> {
    tracer
        .run("competitor_selection")
        .metadata(json!({
            "reference_product": reference.asin,
            "category": reference.category,
        }))
        .scope(|mut run| async move {
            let run_id = run.id();

            // Step 1: keyword generation (mock LLM)
            let keywords = run
                .step("keyword_generation")
                .input(json!({
                    "product_title": reference.title,
                    "category": reference.category,
                }))
                .reasoning(format!(
                    "Extracting key product attributes from '{}' in category '{}'",
                    reference.title, reference.category
                ))
                .scope(|step| async move {
                    let keywords = generate_keywords(reference.title, reference.category);
                    step.set_output(json!({"keywords": keywords.clone(), "model": "mock"}));
                    Ok::<_, anyhow::Error>(keywords)
                })
                .await?;

            // Step 2: candidate search (mock API with ranking)
            let primary = keywords[0].clone();
            let candidates = run
                .step("candidate_search")
                .input(json!({
                    "keywords": keywords.clone(),
                    "primary_keyword": primary.clone(),
                    "limit": 50,
                }))
                .reasoning(format!(
                    "Searched for '{primary}' and ranked candidates by keyword overlap + category match"
                ))
                .scope(|step| async move {
                    let mut scored: Vec<(Score, Product)> = mock_candidates()
                        .into_iter()
                        .map(|c| (score_candidate(&primary, reference.category, &c), c))
                        .collect();
                    scored.sort_by(|a, b| {
                        b.0.score
                            .partial_cmp(&a.0.score)
                            .unwrap_or(Ordering::Equal)
                            .then(b.1.reviews.cmp(&a.1.reviews))
                    });

                    let top_n = 8;
                    for (rank, (score, candidate)) in scored.iter().enumerate().take(20) {
                        let rank = rank + 1;
                        step.add_evaluation(evaluation(
                            candidate,
                            json!({
                                "keyword_overlap": {
                                    "passed": !score.overlap.is_empty(),
                                    "detail": format!("overlap={} tokens={:?}", score.overlap.len(), score.overlap),
                                },
                                "category_match": {
                                    "passed": score.category_match,
                                    "detail": format!(
                                        "candidate_category='{}' vs reference_category='{}'",
                                        candidate.category, reference.category
                                    ),
                                },
                                "accessory_penalty": {
                                    "passed": score.accessory_hits.is_empty(),
                                    "detail": format!("accessory_hits={:?}", score.accessory_hits),
                                },
                                "total_score": {
                                    "passed": true,
                                    "detail": format!("rank={} score={:.2}", rank, score.score),
                                },
                            }),
                            rank <= top_n,
                        ));
                    }

                    let candidates: Vec<Product> =
                        scored.into_iter().take(top_n).map(|(_, c)| c).collect();
                    step.set_output(json!({
                        "candidates_fetched": candidates.len(),
                        "search_keywords_used": keywords,
                        "ranking_method": "token_overlap + category_boost - accessory_penalty",
                        "candidates": candidates.clone(),
                    }));
                    Ok::<_, anyhow::Error>(candidates)
                })
                .await?;

            // Step 3: apply filters and select
            run.step("apply_filters_and_select")
                .input(json!({
                    "candidates_count": candidates.len(),
                    "reference_product": reference,
                }))
                .reasoning("Applying price, rating, and review count filters to narrow candidates")
                .scope(|step| async move {
                    let price_min = reference.price * 0.5;
                    let price_max = reference.price * 2.0;
                    let min_rating = 3.8;
                    let min_reviews = 100;

                    step.set_filters(json!({
                        "price_range": {
                            "min": price_min,
                            "max": price_max,
                            "rule": "0.5x - 2x of reference price",
                        },
                        "min_rating": {"value": min_rating, "rule": "Must be at least 3.8 stars"},
                        "min_reviews": {"value": min_reviews, "rule": "Must have at least 100 reviews"},
                    }));

                    let mut qualified = Vec::new();
                    for candidate in &candidates {
                        let price_ok = (price_min..=price_max).contains(&candidate.price);
                        let rating_ok = candidate.rating >= min_rating;
                        let reviews_ok = candidate.reviews >= min_reviews;
                        let passed = price_ok && rating_ok && reviews_ok;

                        step.add_evaluation(evaluation(
                            candidate,
                            json!({
                                "price_range": {
                                    "passed": price_ok,
                                    "detail": format!(
                                        "${:.2} is {} ${price_min:.2}-${price_max:.2}",
                                        candidate.price,
                                        if price_ok { "within" } else { "outside" }
                                    ),
                                },
                                "min_rating": {
                                    "passed": rating_ok,
                                    "detail": format!(
                                        "{} {} {min_rating}",
                                        candidate.rating,
                                        if rating_ok { ">=" } else { "<" }
                                    ),
                                },
                                "min_reviews": {
                                    "passed": reviews_ok,
                                    "detail": format!(
                                        "{} {} {min_reviews} minimum",
                                        candidate.reviews,
                                        if reviews_ok { ">=" } else { "<" }
                                    ),
                                },
                            }),
                            passed,
                        ));
                        if passed {
                            qualified.push(candidate.clone());
                        }
                    }

                    // Best candidate = highest review count among the qualified.
                    let selected = qualified.iter().max_by_key(|c| c.reviews);
                    step.set_output(json!({
                        "total_evaluated": candidates.len(),
                        "passed": qualified.len(),
                        "failed": candidates.len() - qualified.len(),
                        "selected_competitor": selected,
                        "selection_reason": match selected {
                            Some(s) => format!(
                                "Highest review count ({}) among qualified candidates", s.reviews
                            ),
                            None => "No candidates passed all filters".to_string(),
                        },
                    }));
                    Ok::<_, anyhow::Error>(())
                })
                .await?;

            Ok(run_id)
        })
        .await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let store = Arc::new(MemoryStore::new());
    let tracer = Tracer::new(store.clone());

    let run_id = run_pipeline(&tracer, &REFERENCE_PRODUCT).await?;
    println!("Recorded run {run_id}\n");

    let detail = store
        .get_run(run_id)
        .await?
        .expect("the run we just recorded exists");

    println!(
        "{} — {} ({}ms)",
        detail.run.name,
        detail.run.status,
        detail.run.duration_ms.unwrap_or(0)
    );
    for step in &detail.steps {
        let evaluated = step.evaluations.as_ref().map_or(0, Vec::len);
        println!(
            "  [{}] {} — {} ({} evaluations)",
            step.index,
            step.name,
            step.status,
            evaluated
        );
    }
    if let Some(last) = detail.steps.last() {
        if let Some(Value::Object(output)) = &last.output {
            if let Some(selected) = output.get("selected_competitor") {
                println!("\nSelected competitor: {}", selected["title"]);
                println!("Reason: {}", output["selection_reason"]);
            }
        }
    }
    assert_eq!(detail.run.status, Status::Success);
    Ok(())
}
