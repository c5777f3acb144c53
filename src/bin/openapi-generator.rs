use utoipa::OpenApi;
use watch_party_back::services::documentation::ApiDoc;

fn main() {
    println!("{}", ApiDoc::openapi().to_pretty_json().unwrap());
}
