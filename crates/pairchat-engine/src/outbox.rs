use pairchat_core::{ConnectionId, ServerEvent};

/// Who receives a delivery.
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    Connection(ConnectionId),
    Everyone,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub target: Target,
    pub event: ServerEvent,
}

/// Ordered deliveries produced by one engine operation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Outbox {
    deliveries: Vec<Delivery>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to(&mut self, id: &ConnectionId, event: ServerEvent) {
        self.deliveries.push(Delivery {
            target: Target::Connection(id.clone()),
            event,
        });
    }

    pub fn everyone(&mut self, event: ServerEvent) {
        self.deliveries.push(Delivery {
            target: Target::Everyone,
            event,
        });
    }

    pub fn push(&mut self, delivery: Delivery) {
        self.deliveries.push(delivery);
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Delivery> {
        self.deliveries.iter()
    }

    /// Events addressed to one connection, in emission order.
    pub fn events_for(&self, id: &ConnectionId) -> Vec<&ServerEvent> {
        self.deliveries
            .iter()
            .filter(|d| matches!(&d.target, Target::Connection(t) if t == id))
            .map(|d| &d.event)
            .collect()
    }
}

impl IntoIterator for Outbox {
    type Item = Delivery;
    type IntoIter = std::vec::IntoIter<Delivery>;

    fn into_iter(self) -> Self::IntoIter {
        self.deliveries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_for_filters_by_target() {
        let a = ConnectionId::from_raw("conn_a");
        let b = ConnectionId::from_raw("conn_b");
        let mut out = Outbox::new();
        out.to(&a, ServerEvent::Waiting);
        out.everyone(ServerEvent::UpdateOnlineUsers(2));
        out.to(&b, ServerEvent::ChatEnded);
        out.to(&a, ServerEvent::ChatEnded);

        assert_eq!(out.len(), 4);
        assert_eq!(
            out.events_for(&a),
            vec![&ServerEvent::Waiting, &ServerEvent::ChatEnded]
        );
        assert_eq!(out.events_for(&b), vec![&ServerEvent::ChatEnded]);
    }
}
