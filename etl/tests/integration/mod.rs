mod extraction_test;
mod pipeline_test;
mod routing_test;
mod schema_test;
