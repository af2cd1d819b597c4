mod fixtures;
mod test_engine;
mod test_http;
mod test_loader;
mod test_sqlite;
