mod targets;

pub(crate) use targets::QueryTarget;
