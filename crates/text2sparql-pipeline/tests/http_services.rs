//! HTTP clients for the SPARQL endpoint and the annotation service.

use mockito::Matcher;
use std::time::Duration;
use text2sparql_pipeline::{
    AnnotationError, AnnotationService, EndpointError, HttpSparqlEndpoint, QueryAnswer,
    SparqlEndpoint, SpotlightClient,
};

const QUERY: &str = "SELECT ?p WHERE { <http://dbpedia.org/resource/Paris> <http://dbpedia.org/ontology/populationTotal> ?p }";

#[tokio::test]
async fn endpoint_sends_query_as_get_parameters() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/sparql")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("query".into(), QUERY.into()),
            Matcher::UrlEncoded("format".into(), "json".into()),
        ]))
        .match_header("accept", "application/sparql-results+json")
        .with_status(200)
        .with_header("content-type", "application/sparql-results+json")
        .with_body(
            r#"{"head":{"vars":["p"]},"results":{"bindings":[
                {"p":{"type":"typed-literal","datatype":"http://www.w3.org/2001/XMLSchema#nonNegativeInteger","value":"2165423"}}
            ]}}"#,
        )
        .create_async()
        .await;

    let endpoint =
        HttpSparqlEndpoint::new(&format!("{}/sparql", server.url()), Duration::from_secs(5)).unwrap();
    let answer = endpoint.query(QUERY).await.unwrap();

    mock.assert_async().await;
    match answer {
        QueryAnswer::Bindings(rows) => {
            assert_eq!(rows.len(), 1);
            let p = &rows[0]["p"];
            assert_eq!(p.value, "2165423");
            assert_eq!(
                p.datatype.as_deref(),
                Some("http://www.w3.org/2001/XMLSchema#nonNegativeInteger")
            );
        }
        other => panic!("expected bindings, got {other:?}"),
    }
}

#[tokio::test]
async fn endpoint_decodes_ask_answers() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/sparql")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"head":{},"boolean":false}"#)
        .create_async()
        .await;

    let endpoint =
        HttpSparqlEndpoint::new(&format!("{}/sparql", server.url()), Duration::from_secs(5)).unwrap();
    let answer = endpoint.query("ASK { ?s ?p ?o }").await.unwrap();
    assert_eq!(answer, QueryAnswer::Boolean(false));
}

#[tokio::test]
async fn endpoint_rejection_keeps_status_and_body() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/sparql")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body("Virtuoso 37000 Error SP030: SPARQL compiler, line 1: syntax error")
        .create_async()
        .await;

    let endpoint =
        HttpSparqlEndpoint::new(&format!("{}/sparql", server.url()), Duration::from_secs(5)).unwrap();
    match endpoint.query("SELEC ?x").await {
        Err(EndpointError::Status { status, body }) => {
            assert_eq!(status, 400);
            assert!(body.contains("SP030"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn annotator_posts_text_and_confidence_as_form() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/annotate")
        .match_header("accept", "application/json")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("text".into(), "What is the population of Paris?".into()),
            Matcher::UrlEncoded("confidence".into(), "0.5".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"@text":"What is the population of Paris?","@confidence":"0.5","Resources":[
                {"@URI":"http://dbpedia.org/resource/Paris","@support":"90000",
                 "@types":"Wikidata:Q515,DBpedia:City","@surfaceForm":"Paris",
                 "@offset":"26","@similarityScore":"0.99"}
            ]}"#,
        )
        .create_async()
        .await;

    let client = SpotlightClient::new(&server.url(), Duration::from_secs(5)).unwrap();
    let annotations = client
        .annotate("What is the population of Paris?", 0.5)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(annotations.len(), 1);
    assert_eq!(annotations[0].uri, "http://dbpedia.org/resource/Paris");
    assert_eq!(annotations[0].offset, 26);
    assert_eq!(annotations[0].entity_type(), "Q515");
}

#[tokio::test]
async fn annotator_without_resources_means_no_candidates() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/annotate")
        .with_status(200)
        .with_body(r#"{"@text":"hello there","@confidence":"0.5"}"#)
        .create_async()
        .await;

    let client = SpotlightClient::new(&format!("{}/", server.url()), Duration::from_secs(5)).unwrap();
    let annotations = client.annotate("hello there", 0.5).await.unwrap();
    assert!(annotations.is_empty());
}

#[tokio::test]
async fn annotator_server_error_is_reported() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/annotate")
        .with_status(503)
        .create_async()
        .await;

    let client = SpotlightClient::new(&server.url(), Duration::from_secs(5)).unwrap();
    let err = client.annotate("Paris", 0.5).await.unwrap_err();
    assert!(matches!(err, AnnotationError::Status(503)));
}
