mod workspace_facade;
