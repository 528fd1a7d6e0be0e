// Integration tests follow the organization suggested by Matklad:
// https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod event_ordering;
mod graph_notifications;
mod message_routing;
mod path_resolution;
